//! Drives one assistant run per user turn and folds everything the run
//! produces into a single stream of text chunks.
//!
//! A turn moves through
//! `Idle -> Streaming -> (AwaitingToolOutputs -> Resuming)* -> {Done | Failed}`.
//! Tool calls are resolved through the [`TaskOrchestrator`] and the run is
//! resumed on the stream opened by the tool output submission. Failures
//! never surface as stream errors: they become text chunks.

use crate::{
    artifact::ArtifactRegistry,
    config::AppConfig,
    errors::AgentError,
    opentelemetry::{trace_turn_stream, TurnSpan},
    orchestrator::{CompletedJob, FailedJob, JobOutcome, TaskOrchestrator},
    phrases,
    session::{Message, Role, Session},
    status::StatusSink,
};
use dealdesk_sdk::{
    assistants::{
        AssistantProvider, AssistantStreamEvent, MessageOrder, MessageRole, Run, ThreadMessage,
        ToolCall, ToolOutput,
    },
    BoxedStream, OpenAIAssistantClient, RunEventStream, TaskClient,
};
use futures::{lock::Mutex, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

pub const BUSY_WARNING: &str = "⚠️ Another task is still being processed. Please wait until it finishes before sending a new message.";
pub const TIMEOUT_WARNING: &str = "⚠️ The maximum waiting time was exceeded for this request. Something probably went wrong. Please try again.";
const GENERIC_FAILURE: &str = "Error during processing";
/// Recent thread messages inspected when a run streamed no text.
const FALLBACK_LOOKBACK: u32 = 10;

/// Text chunks of one turn, in the order the provider produced them.
pub type TurnStream = BoxedStream<'static, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Streaming,
    AwaitingToolOutputs,
    Resuming,
    Done,
    Failed,
}

impl EngineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::AwaitingToolOutputs => "awaiting_tool_outputs",
            Self::Resuming => "resuming",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to send back for a tool call whose job timed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimedOutOutputPolicy {
    /// Leave the call out of the batch so the provider does not retry it.
    #[default]
    Omit,
    /// Send a failure output for the call id.
    Placeholder,
}

impl FromStr for TimedOutOutputPolicy {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "placeholder" => Ok(Self::Placeholder),
            other => Err(AgentError::Config(format!(
                "unknown timed out output policy: {other}"
            ))),
        }
    }
}

/// Options for the conversation engine.
/// # Default Values
/// - `assistant_id`: empty
/// - `timed_out_output_policy`: `Omit`
/// - `active_run_lookback`: 5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub assistant_id: String,
    pub timed_out_output_policy: TimedOutOutputPolicy,
    /// How many recent runs are inspected before a turn starts.
    pub active_run_lookback: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            assistant_id: String::new(),
            timed_out_output_policy: TimedOutOutputPolicy::Omit,
            active_run_lookback: 5,
        }
    }
}

/// Output returned to the provider for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    #[must_use]
    pub fn completed(completed: &CompletedJob) -> Self {
        let files_info: Vec<Value> = completed
            .job
            .artifacts
            .iter()
            .map(|artifact| json!({ "filename": artifact.filename, "type": artifact.type_hint }))
            .collect();

        Self {
            success: true,
            message: "Processing completed successfully".to_string(),
            data: Some(json!({
                "event_data": serde_json::to_value(&completed.snapshot).unwrap_or_default(),
                "files_info": files_info,
            })),
        }
    }

    #[must_use]
    pub fn failed(failed: &FailedJob) -> Self {
        Self::failure(
            failed.error.to_string(),
            Some(json!({
                "error": failed.error.to_string(),
                "details": failed.error.details(),
            })),
        )
    }

    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            success: false,
            message: "timed out".to_string(),
            data: None,
        }
    }

    fn failure(error: String, data: Option<Value>) -> Self {
        Self {
            success: false,
            message: format!("Error during processing: {error}"),
            data,
        }
    }

    fn into_output(self, tool_call_id: &str) -> ToolOutput {
        let output = serde_json::to_string(&self).unwrap_or_else(|error| {
            json!({ "success": false, "message": error.to_string() }).to_string()
        });
        ToolOutput {
            tool_call_id: tool_call_id.to_string(),
            output,
        }
    }
}

pub struct ConversationEngine {
    provider: Arc<dyn AssistantProvider>,
    orchestrator: Arc<TaskOrchestrator>,
    options: EngineOptions,
    status: StatusSink,
    session: Arc<Mutex<Session>>,
    registry: ArtifactRegistry,
    turn_active: Arc<AtomicBool>,
}

impl ConversationEngine {
    /// The engine reports on the orchestrator's status sink so both write
    /// to the same slot.
    #[must_use]
    pub fn new(
        provider: Arc<dyn AssistantProvider>,
        orchestrator: Arc<TaskOrchestrator>,
        options: EngineOptions,
    ) -> Self {
        let registry = ArtifactRegistry::new();
        Self {
            provider,
            status: orchestrator.status_sink().clone(),
            orchestrator,
            options,
            session: Arc::new(Mutex::new(Session::new(registry.clone()))),
            registry,
            turn_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire the HTTP clients described by the config.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let tasks = Arc::new(TaskClient::new(config.task_client_options()));
        let provider = Arc::new(OpenAIAssistantClient::new(
            config.assistant_client_options(),
        ));
        let orchestrator = TaskOrchestrator::new(tasks, StatusSink::new())
            .with_options(config.orchestrator);
        Self::new(provider, Arc::new(orchestrator), config.engine_options())
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    #[must_use]
    pub fn status_sink(&self) -> &StatusSink {
        &self.status
    }

    pub async fn thread_id(&self) -> Option<String> {
        self.session.lock().await.thread_id().map(ToString::to_string)
    }

    /// Transcript recorded by past turns.
    pub async fn messages(&self) -> Vec<Message> {
        self.session.lock().await.messages().to_vec()
    }

    /// State reached by the latest turn.
    pub async fn state(&self) -> EngineState {
        self.session.lock().await.state()
    }

    /// Run one turn for the latest user message in `history`.
    ///
    /// Nothing happens until the returned stream is polled. The stream ends
    /// when the run reaches a terminal state; errors are delivered as text.
    pub fn send_message(&self, history: &[Message]) -> TurnStream {
        let user_text = history
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone());

        let span = TurnSpan::new();
        let mut turn = Turn {
            provider: self.provider.clone(),
            orchestrator: self.orchestrator.clone(),
            options: self.options.clone(),
            status: self.status.clone(),
            session: self.session.clone(),
            span: span.clone(),
            state: EngineState::Idle,
            thread_id: String::new(),
            message_id: None,
            previous_message_id: None,
            streamed: false,
            transcript: String::new(),
            error: None,
        };
        let turn_active = self.turn_active.clone();

        let stream = async_stream::stream! {
            let _guard = match TurnGuard::acquire(&turn_active) {
                Some(guard) => guard,
                None => {
                    warn!("turn refused, another turn is in progress");
                    yield BUSY_WARNING.to_string();
                    return;
                }
            };

            let mut events = match turn.open(user_text).await {
                Ok(Opening::Stream(events)) => events,
                Ok(Opening::Busy) => {
                    turn.span.on_end(EngineState::Idle, None);
                    yield BUSY_WARNING.to_string();
                    return;
                }
                Err(error) => {
                    let reaction = turn.fail(format!("Error: {error}"), &error).await;
                    for chunk in reaction.chunks {
                        turn.transcript.push_str(&chunk);
                        yield chunk;
                    }
                    turn.close().await;
                    return;
                }
            };

            loop {
                let reaction = match events.next().await {
                    Some(Ok(event)) => turn.handle(event).await,
                    Some(Err(error)) => {
                        let error = AgentError::from(error);
                        turn.fail(format!("Error: {error}"), &error).await
                    }
                    None => turn.stream_closed().await,
                };

                for chunk in reaction.chunks {
                    turn.transcript.push_str(&chunk);
                    yield chunk;
                }

                match reaction.control {
                    Control::Continue => {}
                    Control::Reopen(resumed) => events = resumed,
                    Control::Finish => break,
                }
            }

            for chunk in turn.fallback().await {
                turn.transcript.push_str(&chunk);
                yield chunk;
            }

            turn.close().await;
        };

        BoxedStream::from_stream(trace_turn_stream(&span, stream))
    }

    /// Every message of the thread, oldest first. Empty when no thread
    /// exists yet.
    pub async fn load_history(&self) -> Result<Vec<Message>, AgentError> {
        let Some(thread_id) = self.thread_id().await else {
            return Ok(vec![]);
        };

        let messages = self
            .provider
            .list_messages(&thread_id, MessageOrder::Asc, None)
            .await?;

        Ok(messages.iter().map(to_message).collect())
    }

    /// Id of the assistant message produced by the latest turn, or the
    /// newest message of the thread when no turn latched one.
    pub async fn latest_message_id(&self) -> Result<Option<String>, AgentError> {
        let (latched, thread_id) = {
            let session = self.session.lock().await;
            (
                session.current_message_id().map(ToString::to_string),
                session.thread_id().map(ToString::to_string),
            )
        };
        if latched.is_some() {
            return Ok(latched);
        }
        let Some(thread_id) = thread_id else {
            return Ok(None);
        };

        let newest = self
            .provider
            .list_messages(&thread_id, MessageOrder::Desc, Some(1))
            .await?;
        Ok(newest.into_iter().next().map(|message| message.id))
    }

    /// Forget the thread, the transcript and every artifact.
    pub async fn reset(&self) {
        self.session.lock().await.reset();
        self.status.clear();
        info!("session reset");
    }
}

fn to_message(message: &ThreadMessage) -> Message {
    let content = message.text_content();
    let message_text = match message.role {
        MessageRole::User => Message::user(content),
        MessageRole::Assistant => Message::assistant(content),
    };
    message_text.with_message_id(&message.id)
}

/// Releases the engine's turn slot when the turn stream is dropped.
struct TurnGuard(Arc<AtomicBool>);

impl TurnGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Opening {
    Stream(RunEventStream),
    /// A run started elsewhere still owns the thread.
    Busy,
}

enum Control {
    Continue,
    /// Keep reading from the stream opened by a tool output submission.
    Reopen(RunEventStream),
    Finish,
}

struct Reaction {
    chunks: Vec<String>,
    control: Control,
}

impl Reaction {
    fn proceed() -> Self {
        Self {
            chunks: vec![],
            control: Control::Continue,
        }
    }

    fn finish() -> Self {
        Self {
            chunks: vec![],
            control: Control::Finish,
        }
    }
}

/// State of a single turn.
struct Turn {
    provider: Arc<dyn AssistantProvider>,
    orchestrator: Arc<TaskOrchestrator>,
    options: EngineOptions,
    status: StatusSink,
    session: Arc<Mutex<Session>>,
    span: TurnSpan,
    state: EngineState,
    thread_id: String,
    /// Assistant message latched by this turn.
    message_id: Option<String>,
    /// Assistant message latched by the turn before this one.
    previous_message_id: Option<String>,
    /// Whether the provider streamed any text.
    streamed: bool,
    /// Every chunk yielded so far.
    transcript: String,
    error: Option<String>,
}

impl Turn {
    async fn open(&mut self, user_text: Option<String>) -> Result<Opening, AgentError> {
        let (thread_id, created) = self.ensure_thread().await?;
        self.span.on_thread(&thread_id);
        self.thread_id.clone_from(&thread_id);

        if !created {
            let runs = self
                .provider
                .list_runs(&thread_id, self.options.active_run_lookback)
                .await?;
            if let Some(active) = runs.iter().find(|run| run.status.is_active()) {
                warn!(%thread_id, run_id = %active.id, status = ?active.status, "run still active on thread");
                return Ok(Opening::Busy);
            }
        }

        self.previous_message_id = self.session.lock().await.start_turn();

        if let Some(text) = user_text {
            self.provider
                .create_message(&thread_id, MessageRole::User, &text)
                .await?;
            self.session.lock().await.push_message(Message::user(text));
        }

        let events = self
            .provider
            .stream_run(&thread_id, &self.options.assistant_id)
            .await?;
        self.transition(EngineState::Streaming).await;

        Ok(Opening::Stream(events))
    }

    async fn ensure_thread(&self) -> Result<(String, bool), AgentError> {
        let existing = self
            .session
            .lock()
            .await
            .thread_id()
            .map(ToString::to_string);
        if let Some(thread_id) = existing {
            return Ok((thread_id, false));
        }

        let thread = self.provider.create_thread().await?;
        info!(thread_id = %thread.id, "thread created");
        self.session.lock().await.set_thread_id(thread.id.clone());
        Ok((thread.id, true))
    }

    async fn handle(&mut self, event: AssistantStreamEvent) -> Reaction {
        debug!(event = event.name(), state = %self.state, "run event");

        match event {
            AssistantStreamEvent::RunCreated(run) => {
                self.span.on_run(&run.id);
                self.status.info(phrases::run_created());
                Reaction::proceed()
            }
            AssistantStreamEvent::RunQueued(_) => {
                self.status.info(phrases::run_queued());
                Reaction::proceed()
            }
            AssistantStreamEvent::RunInProgress(_) => {
                self.status.info(phrases::run_in_progress());
                Reaction::proceed()
            }
            AssistantStreamEvent::StepCreated(step) | AssistantStreamEvent::StepInProgress(step) => {
                if let Some(phrase) = step
                    .step_details
                    .as_ref()
                    .and_then(|details| phrases::step(&details.kind))
                {
                    self.status.info(phrase);
                }
                Reaction::proceed()
            }
            AssistantStreamEvent::RunRequiresAction(run) => self.requires_action(&run).await,
            AssistantStreamEvent::MessageCreated(message) => {
                self.latch(&message.id).await;
                let flushed = self.session.lock().await.flush_pending(&message.id);
                if flushed > 0 {
                    info!(message_id = %message.id, artifacts = flushed, "artifacts attached");
                }
                Reaction::proceed()
            }
            AssistantStreamEvent::MessageDelta(delta) => {
                if let Some(message_id) = delta.id.as_deref() {
                    self.latch_if_unset(message_id).await;
                }
                let chunks: Vec<String> = delta
                    .text_fragments()
                    .filter(|fragment| !fragment.is_empty())
                    .map(ToString::to_string)
                    .collect();
                if !chunks.is_empty() {
                    self.streamed = true;
                    self.status.clear();
                }
                Reaction {
                    chunks,
                    control: Control::Continue,
                }
            }
            AssistantStreamEvent::RunCompleted(run) => {
                info!(run_id = %run.id, "run completed");
                self.transition(EngineState::Done).await;
                Reaction::finish()
            }
            AssistantStreamEvent::RunFailed(run)
            | AssistantStreamEvent::RunCancelled(run)
            | AssistantStreamEvent::RunExpired(run)
            | AssistantStreamEvent::RunIncomplete(run) => self.run_ended(&run).await,
            AssistantStreamEvent::Error(error) => {
                let text = format!("Error: {}", error.message);
                self.fail(text, &AgentError::ProviderRunFailed(error.message))
                    .await
            }
            _ => Reaction::proceed(),
        }
    }

    async fn requires_action(&mut self, run: &Run) -> Reaction {
        self.span.on_run(&run.id);
        self.transition(EngineState::AwaitingToolOutputs).await;

        let (tool_outputs, mut chunks) = self.resolve_tool_calls(run.tool_calls()).await;

        self.status.info(phrases::RETRIEVING_ANSWER);
        info!(run_id = %run.id, outputs = tool_outputs.len(), "submitting tool outputs");

        match self
            .provider
            .submit_tool_outputs_stream(&self.thread_id, &run.id, tool_outputs)
            .await
        {
            Ok(resumed) => {
                self.transition(EngineState::Resuming).await;
                Reaction {
                    chunks,
                    control: Control::Reopen(resumed),
                }
            }
            Err(error) => {
                let error = AgentError::from(error);
                let reaction = self.fail(format!("Error: {error}"), &error).await;
                chunks.extend(reaction.chunks);
                Reaction {
                    chunks,
                    control: reaction.control,
                }
            }
        }
    }

    /// Run each call's job in order. Returns the outputs to submit and the
    /// chunks to show the user.
    async fn resolve_tool_calls(&self, tool_calls: &[ToolCall]) -> (Vec<ToolOutput>, Vec<String>) {
        let mut tool_outputs = Vec::with_capacity(tool_calls.len());
        let mut chunks = vec![];

        for call in tool_calls {
            let function = call.function.name.as_str();
            self.status.info(phrases::tool(function));
            info!(tool_call_id = %call.id, function, "dispatching tool call");

            let payload = match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(tool_call_id = %call.id, %error, "invalid tool arguments");
                    let result =
                        ToolResult::failure(format!("invalid tool arguments: {error}"), None);
                    tool_outputs.push(result.into_output(&call.id));
                    continue;
                }
            };

            let result = match self.orchestrator.run(payload).await {
                JobOutcome::Completed(completed) => {
                    let result = ToolResult::completed(&completed);
                    let count = completed.job.artifacts.len();
                    if count > 0 {
                        self.status
                            .success(format!("{count} result file(s) retrieved"));
                    }
                    self.session
                        .lock()
                        .await
                        .hold_pending(completed.job.artifacts);
                    result
                }
                JobOutcome::Failed(failed) => {
                    self.status.error(format!("Error: {}", failed.error));
                    ToolResult::failed(&failed)
                }
                JobOutcome::TimedOut(timed_out) => {
                    warn!(
                        tool_call_id = %call.id,
                        attempts = timed_out.attempts,
                        policy = ?self.options.timed_out_output_policy,
                        "tool call timed out"
                    );
                    chunks.push(TIMEOUT_WARNING.to_string());
                    match self.options.timed_out_output_policy {
                        TimedOutOutputPolicy::Omit => continue,
                        TimedOutOutputPolicy::Placeholder => ToolResult::timed_out(),
                    }
                }
            };

            tool_outputs.push(result.into_output(&call.id));
        }

        (tool_outputs, chunks)
    }

    async fn run_ended(&mut self, run: &Run) -> Reaction {
        let (text, detail) = match &run.last_error {
            Some(error) => (format!("Error: {}", error.message), error.message.clone()),
            None => (GENERIC_FAILURE.to_string(), format!("run ended as {:?}", run.status)),
        };
        self.fail(text, &AgentError::ProviderRunFailed(detail)).await
    }

    /// Report `text` to the user and end the turn.
    async fn fail(&mut self, text: String, error: &AgentError) -> Reaction {
        warn!(%error, thread_id = %self.thread_id, "turn failed");
        self.status.error(text.clone());
        self.error = Some(error.to_string());
        self.transition(EngineState::Failed).await;
        Reaction {
            chunks: vec![format!("\n\n{text}")],
            control: Control::Finish,
        }
    }

    async fn stream_closed(&mut self) -> Reaction {
        if !self.state.is_terminal() {
            debug!(state = %self.state, "run stream closed");
            self.transition(EngineState::Done).await;
        }
        Reaction::finish()
    }

    /// When the run completed without streaming any text, fetch the message
    /// it produced instead. That is the message latched by this turn or, if
    /// none was, the newest assistant message unless an earlier turn already
    /// showed it.
    async fn fallback(&mut self) -> Vec<String> {
        if self.streamed || self.state == EngineState::Failed {
            return vec![];
        }

        let recent = match self
            .provider
            .list_messages(&self.thread_id, MessageOrder::Desc, Some(FALLBACK_LOOKBACK))
            .await
        {
            Ok(recent) => recent,
            Err(error) => {
                warn!(%error, "failed to fetch the latest message");
                return vec![format!("\n\nError: {}", AgentError::from(error))];
            }
        };

        let message = match self.message_id.as_deref() {
            Some(latched) => recent.into_iter().find(|message| message.id == latched),
            None => recent
                .into_iter()
                .find(|message| message.role == MessageRole::Assistant)
                .filter(|message| self.previous_message_id.as_deref() != Some(message.id.as_str())),
        };
        let Some(message) = message else {
            debug!("no new assistant message on the thread");
            return vec![];
        };

        debug!(message_id = %message.id, "using latest thread message");
        self.latch_if_unset(&message.id).await;
        let text = message.text_content();
        if text.is_empty() {
            vec![]
        } else {
            vec![text]
        }
    }

    /// Make `message_id` the message this turn produces.
    async fn latch(&mut self, message_id: &str) {
        self.session.lock().await.latch_message(message_id);
        self.message_id = Some(message_id.to_string());
        self.span.on_message(message_id);
    }

    async fn latch_if_unset(&mut self, message_id: &str) {
        if self.message_id.is_none() {
            self.latch(message_id).await;
        }
    }

    async fn transition(&mut self, next: EngineState) {
        debug!(from = %self.state, to = %next, "turn state");
        self.state = next;
        self.session.lock().await.set_state(next);
    }

    /// Record the assistant message and release the status slot.
    async fn close(&mut self) {
        if !self.transcript.is_empty() || self.message_id.is_some() {
            let mut message = Message::assistant(self.transcript.clone());
            message.message_id.clone_from(&self.message_id);
            self.session.lock().await.push_message(message);
        }

        self.status.clear();
        self.span.on_end(self.state, self.error.as_deref());
        info!(state = %self.state, thread_id = %self.thread_id, "turn finished");
    }
}
