use std::{collections::VecDeque, sync::Mutex};

use futures::stream;

use crate::{
    assistants::{
        AssistantProvider, AssistantStreamEvent, MessageOrder, MessageRole, Run, RunEventStream,
        Thread, ThreadMessage, ToolOutput,
    },
    boxed_stream::BoxedStream,
    errors::{ProviderError, ProviderResult},
};

const PROVIDER: &str = "mock";

/// Result for a mocked run stream.
/// It can either be a set of events or an error to return when opening.
pub enum MockStreamResult {
    Events(Vec<ProviderResult<AssistantStreamEvent>>),
    Error(ProviderError),
}

impl MockStreamResult {
    /// Construct a result that yields the provided events.
    pub fn events(events: Vec<AssistantStreamEvent>) -> Self {
        Self::Events(events.into_iter().map(Ok).collect())
    }

    /// Construct a result that fails to open.
    pub fn error(error: ProviderError) -> Self {
        Self::Error(error)
    }
}

impl From<Vec<AssistantStreamEvent>> for MockStreamResult {
    fn from(events: Vec<AssistantStreamEvent>) -> Self {
        Self::events(events)
    }
}

/// A tool output batch received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedToolOutputs {
    pub thread_id: String,
    pub run_id: String,
    pub tool_outputs: Vec<ToolOutput>,
}

#[derive(Default)]
struct MockAssistantProviderState {
    mocked_threads: VecDeque<ProviderResult<Thread>>,
    mocked_run_lists: VecDeque<ProviderResult<Vec<Run>>>,
    mocked_streams: VecDeque<MockStreamResult>,
    mocked_message_lists: VecDeque<ProviderResult<Vec<ThreadMessage>>>,
    created_threads: usize,
    tracked_messages: Vec<(String, MessageRole, String)>,
    tracked_runs: Vec<(String, String)>,
    tracked_tool_outputs: Vec<SubmittedToolOutputs>,
}

/// A mock assistants provider for testing that tracks mutations and yields
/// predefined events.
#[derive(Default)]
pub struct MockAssistantProvider {
    state: Mutex<MockAssistantProviderState>,
}

impl MockAssistantProvider {
    /// Construct a new mock provider instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the thread returned by the next `create_thread` call.
    pub fn enqueue_thread(&self, thread_id: &str) -> &Self {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_threads.push_back(Ok(Thread {
            id: thread_id.to_string(),
        }));
        drop(state);
        self
    }

    /// Enqueue the result of the next `list_runs` call.
    pub fn enqueue_runs(&self, result: ProviderResult<Vec<Run>>) -> &Self {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_run_lists.push_back(result);
        drop(state);
        self
    }

    /// Enqueue the stream opened by the next `stream_run` or
    /// `submit_tool_outputs_stream` call.
    pub fn enqueue_stream<R>(&self, result: R) -> &Self
    where
        R: Into<MockStreamResult>,
    {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_streams.push_back(result.into());
        drop(state);
        self
    }

    /// Enqueue the result of the next `list_messages` call.
    pub fn enqueue_messages(&self, result: ProviderResult<Vec<ThreadMessage>>) -> &Self {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_message_lists.push_back(result);
        drop(state);
        self
    }

    /// Number of threads created so far.
    pub fn created_threads(&self) -> usize {
        let state = self.state.lock().expect("mock state poisoned");
        state.created_threads
    }

    /// Messages appended so far as `(thread_id, role, content)`.
    pub fn tracked_messages(&self) -> Vec<(String, MessageRole, String)> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_messages.clone()
    }

    /// Runs started so far as `(thread_id, assistant_id)`.
    pub fn tracked_runs(&self) -> Vec<(String, String)> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_runs.clone()
    }

    /// Tool output batches submitted so far.
    pub fn tracked_tool_outputs(&self) -> Vec<SubmittedToolOutputs> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_tool_outputs.clone()
    }

    fn next_stream(&self) -> ProviderResult<RunEventStream> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let result = state
            .mocked_streams
            .pop_front()
            .ok_or_else(|| exhausted("stream"))?;

        match result {
            MockStreamResult::Error(error) => Err(error),
            MockStreamResult::Events(events) => {
                Ok(BoxedStream::from_stream(stream::iter(events)))
            }
        }
    }
}

fn exhausted(kind: &str) -> ProviderError {
    ProviderError::Invariant(PROVIDER, format!("no mocked {kind} results available"))
}

#[async_trait::async_trait]
impl AssistantProvider for MockAssistantProvider {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn create_thread(&self) -> ProviderResult<Thread> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.created_threads += 1;
        state
            .mocked_threads
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("thread")))
    }

    async fn list_runs(&self, _thread_id: &str, _limit: u32) -> ProviderResult<Vec<Run>> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_run_lists.pop_front().unwrap_or(Ok(vec![]))
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> ProviderResult<ThreadMessage> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state
            .tracked_messages
            .push((thread_id.to_string(), role, content.to_string()));
        let id = format!("msg_mock_{}", state.tracked_messages.len());
        Ok(ThreadMessage::text(&id, role, content))
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> ProviderResult<RunEventStream> {
        {
            let mut state = self.state.lock().expect("mock state poisoned");
            state
                .tracked_runs
                .push((thread_id.to_string(), assistant_id.to_string()));
        }
        self.next_stream()
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        tool_outputs: Vec<ToolOutput>,
    ) -> ProviderResult<RunEventStream> {
        {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.tracked_tool_outputs.push(SubmittedToolOutputs {
                thread_id: thread_id.to_string(),
                run_id: run_id.to_string(),
                tool_outputs,
            });
        }
        self.next_stream()
    }

    async fn list_messages(
        &self,
        _thread_id: &str,
        _order: MessageOrder,
        _limit: Option<u32>,
    ) -> ProviderResult<Vec<ThreadMessage>> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state
            .mocked_message_lists
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("message list")))
    }
}
