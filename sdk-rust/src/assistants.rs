//! Client for the thread-based assistants API.
//!
//! A thread is a provider-side conversation. A run executes the assistant
//! against a thread and reports its progress as a stream of named
//! server-sent events. When the assistant asks for tool calls the run pauses
//! in `requires_action` until the outputs are submitted, which opens a new
//! event stream for the remainder of the run.

use crate::{
    boxed_stream::BoxedStream,
    client_utils::{self, NamedEvent},
    ProviderError, ProviderResult,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const PROVIDER: &str = "openai-assistants";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether a run in this status still owns the thread.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::InProgress | Self::RequiresAction | Self::Cancelling
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorObject {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "ToolCall::default_type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    fn default_type() -> String {
        "function".to_string()
    }

    #[must_use]
    pub fn function(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: Self::default_type(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitToolOutputsAction {
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub submit_tool_outputs: SubmitToolOutputsAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ApiErrorObject>,
}

impl Run {
    #[must_use]
    pub fn new(id: &str, status: RunStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn requiring(id: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            required_action: Some(RequiredAction {
                kind: "submit_tool_outputs".to_string(),
                submit_tool_outputs: SubmitToolOutputsAction { tool_calls },
            }),
            ..Self::new(id, RunStatus::RequiresAction)
        }
    }

    #[must_use]
    pub fn failed(id: &str, message: &str) -> Self {
        Self {
            last_error: Some(ApiErrorObject {
                code: None,
                message: message.to_string(),
            }),
            ..Self::new(id, RunStatus::Failed)
        }
    }

    /// Tool calls the run is waiting on, if any.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .map(|action| action.submit_tool_outputs.tool_calls.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDetails {
    /// `message_creation` or `tool_calls`.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_details: Option<StepDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    #[must_use]
    pub fn text(id: &str, role: MessageRole, text: &str) -> Self {
        Self {
            id: id.to_string(),
            role,
            content: vec![MessageContent {
                kind: "text".to_string(),
                text: Some(TextContent {
                    value: text.to_string(),
                }),
            }],
        }
    }

    /// Concatenation of all text blocks of the message.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_ref())
            .map(|text| text.value.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaContent {
    #[serde(default)]
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Vec<MessageDeltaContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaEvent {
    /// Id of the message being streamed.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub delta: MessageDelta,
}

impl MessageDeltaEvent {
    #[must_use]
    pub fn text(id: Option<&str>, text: &str) -> Self {
        Self {
            id: id.map(ToString::to_string),
            delta: MessageDelta {
                content: vec![MessageDeltaContent {
                    index: 0,
                    kind: "text".to_string(),
                    text: Some(TextDelta {
                        value: Some(text.to_string()),
                    }),
                }],
            },
        }
    }

    /// Text fragments carried by this delta, in order.
    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        self.delta
            .content
            .iter()
            .filter(|content| content.kind == "text")
            .filter_map(|content| content.text.as_ref()?.value.as_deref())
    }
}

/// Output of one tool call, returned to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Events emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantStreamEvent {
    RunCreated(Run),
    RunQueued(Run),
    RunInProgress(Run),
    RunRequiresAction(Run),
    RunCompleted(Run),
    RunIncomplete(Run),
    RunFailed(Run),
    RunCancelling(Run),
    RunCancelled(Run),
    RunExpired(Run),
    StepCreated(RunStep),
    StepInProgress(RunStep),
    StepCompleted(RunStep),
    StepFailed(RunStep),
    MessageCreated(ThreadMessage),
    MessageInProgress(ThreadMessage),
    MessageDelta(MessageDeltaEvent),
    MessageCompleted(ThreadMessage),
    Error(ApiErrorObject),
    /// An event this client does not interpret, by name.
    Other(String),
}

fn parse_data<T: DeserializeOwned>(event: &NamedEvent) -> ProviderResult<T> {
    serde_json::from_str(&event.data).map_err(|e| {
        ProviderError::Invariant(
            PROVIDER,
            format!("Failed to parse {} event: {e}", event.event),
        )
    })
}

impl AssistantStreamEvent {
    /// Decode a named server-sent event.
    pub fn from_named(event: &NamedEvent) -> ProviderResult<Self> {
        Ok(match event.event.as_str() {
            "thread.run.created" => Self::RunCreated(parse_data(event)?),
            "thread.run.queued" => Self::RunQueued(parse_data(event)?),
            "thread.run.in_progress" => Self::RunInProgress(parse_data(event)?),
            "thread.run.requires_action" => Self::RunRequiresAction(parse_data(event)?),
            "thread.run.completed" => Self::RunCompleted(parse_data(event)?),
            "thread.run.incomplete" => Self::RunIncomplete(parse_data(event)?),
            "thread.run.failed" => Self::RunFailed(parse_data(event)?),
            "thread.run.cancelling" => Self::RunCancelling(parse_data(event)?),
            "thread.run.cancelled" => Self::RunCancelled(parse_data(event)?),
            "thread.run.expired" => Self::RunExpired(parse_data(event)?),
            "thread.run.step.created" => Self::StepCreated(parse_data(event)?),
            "thread.run.step.in_progress" => Self::StepInProgress(parse_data(event)?),
            "thread.run.step.completed" => Self::StepCompleted(parse_data(event)?),
            "thread.run.step.failed" => Self::StepFailed(parse_data(event)?),
            "thread.message.created" => Self::MessageCreated(parse_data(event)?),
            "thread.message.in_progress" => Self::MessageInProgress(parse_data(event)?),
            "thread.message.delta" => Self::MessageDelta(parse_data(event)?),
            "thread.message.completed" => Self::MessageCompleted(parse_data(event)?),
            "error" => Self::Error(parse_data(event)?),
            other => Self::Other(other.to_string()),
        })
    }

    /// The event name on the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::RunCreated(_) => "thread.run.created",
            Self::RunQueued(_) => "thread.run.queued",
            Self::RunInProgress(_) => "thread.run.in_progress",
            Self::RunRequiresAction(_) => "thread.run.requires_action",
            Self::RunCompleted(_) => "thread.run.completed",
            Self::RunIncomplete(_) => "thread.run.incomplete",
            Self::RunFailed(_) => "thread.run.failed",
            Self::RunCancelling(_) => "thread.run.cancelling",
            Self::RunCancelled(_) => "thread.run.cancelled",
            Self::RunExpired(_) => "thread.run.expired",
            Self::StepCreated(_) => "thread.run.step.created",
            Self::StepInProgress(_) => "thread.run.step.in_progress",
            Self::StepCompleted(_) => "thread.run.step.completed",
            Self::StepFailed(_) => "thread.run.step.failed",
            Self::MessageCreated(_) => "thread.message.created",
            Self::MessageInProgress(_) => "thread.message.in_progress",
            Self::MessageDelta(_) => "thread.message.delta",
            Self::MessageCompleted(_) => "thread.message.completed",
            Self::Error(_) => "error",
            Self::Other(name) => name,
        }
    }
}

pub type RunEventStream = BoxedStream<'static, ProviderResult<AssistantStreamEvent>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrder {
    Asc,
    Desc,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

/// The thread-based assistants API surface.
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    fn provider(&self) -> &'static str;
    async fn create_thread(&self) -> ProviderResult<Thread>;
    /// Most recent runs of a thread, newest first.
    async fn list_runs(&self, thread_id: &str, limit: u32) -> ProviderResult<Vec<Run>>;
    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> ProviderResult<ThreadMessage>;
    /// Start a run of the assistant on the thread and stream its events.
    async fn stream_run(&self, thread_id: &str, assistant_id: &str)
        -> ProviderResult<RunEventStream>;
    /// Resume a run paused in `requires_action` and stream the rest of it.
    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        tool_outputs: Vec<ToolOutput>,
    ) -> ProviderResult<RunEventStream>;
    async fn list_messages(
        &self,
        thread_id: &str,
        order: MessageOrder,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<ThreadMessage>>;
}

#[derive(Clone, Default)]
pub struct OpenAIAssistantClientOptions {
    pub base_url: Option<String>,
    pub api_key: String,
    pub client: Option<Client>,
}

pub struct OpenAIAssistantClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAIAssistantClient {
    #[must_use]
    pub fn new(options: OpenAIAssistantClientOptions) -> Self {
        let OpenAIAssistantClientOptions {
            base_url,
            api_key,
            client,
        } = options;

        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: client.unwrap_or_default(),
        }
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut auth_header_value = HeaderValue::try_from(format!("Bearer {}", self.api_key))
            .map_err(|e| ProviderError::Invariant(PROVIDER, format!("Invalid API key: {e}")))?;
        auth_header_value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth_header_value);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn open_stream<T: Serialize>(&self, url: &str, body: &T) -> ProviderResult<RunEventStream> {
        let events =
            client_utils::send_sse_events(&self.client, url, body, self.headers()?, PROVIDER)
                .await?;

        let stream = events.map(|event| event.and_then(|event| AssistantStreamEvent::from_named(&event)));

        Ok(BoxedStream::from_stream(stream))
    }
}

#[async_trait]
impl AssistantProvider for OpenAIAssistantClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn create_thread(&self) -> ProviderResult<Thread> {
        debug!("creating assistant thread");
        client_utils::send_json(&self.client, &self.url("/threads"), &json!({}), self.headers()?)
            .await
    }

    async fn list_runs(&self, thread_id: &str, limit: u32) -> ProviderResult<Vec<Run>> {
        let response: ListResponse<Run> = client_utils::get_json(
            &self.client,
            &self.url(&format!("/threads/{thread_id}/runs")),
            &[("limit", limit)],
            self.headers()?,
        )
        .await?;
        Ok(response.data)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> ProviderResult<ThreadMessage> {
        debug!(thread_id, "appending message to thread");
        client_utils::send_json(
            &self.client,
            &self.url(&format!("/threads/{thread_id}/messages")),
            &json!({ "role": role, "content": content }),
            self.headers()?,
        )
        .await
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> ProviderResult<RunEventStream> {
        debug!(thread_id, assistant_id, "opening run stream");
        self.open_stream(
            &self.url(&format!("/threads/{thread_id}/runs")),
            &json!({ "assistant_id": assistant_id, "stream": true }),
        )
        .await
    }

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        tool_outputs: Vec<ToolOutput>,
    ) -> ProviderResult<RunEventStream> {
        debug!(thread_id, run_id, count = tool_outputs.len(), "submitting tool outputs");
        self.open_stream(
            &self.url(&format!(
                "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"
            )),
            &json!({ "tool_outputs": tool_outputs, "stream": true }),
        )
        .await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        order: MessageOrder,
        limit: Option<u32>,
    ) -> ProviderResult<Vec<ThreadMessage>> {
        #[derive(Serialize)]
        struct Query {
            order: MessageOrder,
            #[serde(skip_serializing_if = "Option::is_none")]
            limit: Option<u32>,
        }

        let response: ListResponse<ThreadMessage> = client_utils::get_json(
            &self.client,
            &self.url(&format!("/threads/{thread_id}/messages")),
            &Query { order, limit },
            self.headers()?,
        )
        .await?;
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(event: &str, data: &str) -> NamedEvent {
        NamedEvent {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn decodes_requires_action_with_tool_calls() {
        let event = AssistantStreamEvent::from_named(&named(
            "thread.run.requires_action",
            r#"{"id":"run_1","object":"thread.run","status":"requires_action",
                "required_action":{"type":"submit_tool_outputs","submit_tool_outputs":{
                "tool_calls":[{"id":"call_1","type":"function",
                "function":{"name":"get_company_targets","arguments":"{\"company\":\"Acme\"}"}}]}}}"#,
        ))
        .unwrap();

        let AssistantStreamEvent::RunRequiresAction(run) = event else {
            panic!("expected requires_action, got {event:?}");
        };
        assert_eq!(
            run.tool_calls(),
            &[ToolCall::function(
                "call_1",
                "get_company_targets",
                r#"{"company":"Acme"}"#
            )]
        );
    }

    #[test]
    fn decodes_message_delta_text() {
        let event = AssistantStreamEvent::from_named(&named(
            "thread.message.delta",
            r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[
                {"index":0,"type":"text","text":{"value":"Hello","annotations":[]}},
                {"index":1,"type":"image_file","image_file":{"file_id":"x"}}]}}"#,
        ))
        .unwrap();

        let AssistantStreamEvent::MessageDelta(delta) = event else {
            panic!("expected message delta, got {event:?}");
        };
        assert_eq!(delta.id.as_deref(), Some("msg_1"));
        assert_eq!(delta.text_fragments().collect::<Vec<_>>(), vec!["Hello"]);
    }

    #[test]
    fn unknown_run_status_and_event_names_are_tolerated() {
        let event = AssistantStreamEvent::from_named(&named(
            "thread.run.in_progress",
            r#"{"id":"run_1","status":"paused_for_review"}"#,
        ))
        .unwrap();
        assert_eq!(
            event,
            AssistantStreamEvent::RunInProgress(Run::new("run_1", RunStatus::Unknown))
        );

        let event =
            AssistantStreamEvent::from_named(&named("thread.run.step.delta", "{}")).unwrap();
        assert_eq!(
            event,
            AssistantStreamEvent::Other("thread.run.step.delta".to_string())
        );
    }

    #[test]
    fn malformed_payload_is_an_invariant_error() {
        let err = AssistantStreamEvent::from_named(&named("thread.run.failed", "not json"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Invariant(PROVIDER, _)));
    }

    #[test]
    fn active_statuses() {
        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::RequiresAction.is_active());
        assert!(!RunStatus::Completed.is_active());
        assert!(!RunStatus::Failed.is_active());
        assert!(!RunStatus::Unknown.is_active());
    }

    #[test]
    fn thread_message_text_content_joins_text_blocks() {
        let mut message = ThreadMessage::text("msg_1", MessageRole::Assistant, "Hello ");
        message.content.push(MessageContent {
            kind: "image_file".to_string(),
            text: None,
        });
        message.content.push(MessageContent {
            kind: "text".to_string(),
            text: Some(TextContent {
                value: "world".to_string(),
            }),
        });
        assert_eq!(message.text_content(), "Hello world");
    }
}
