use axum::{
    extract::{Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dealdesk_sdk::{
    assistants::{MessageOrder, MessageRole, Run, RunStatus, ThreadMessage, ToolCall, ToolOutput},
    AssistantProvider, AssistantStreamEvent, OpenAIAssistantClient, OpenAIAssistantClientOptions,
    ProviderError,
};
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::{net::TcpListener, sync::oneshot};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

const RUN_STREAM: &str = "event: thread.run.created
data: {\"id\":\"run_1\",\"status\":\"queued\"}

event: thread.run.requires_action
data: {\"id\":\"run_1\",\"status\":\"requires_action\",\"required_action\":{\"type\":\"submit_tool_outputs\",\"submit_tool_outputs\":{\"tool_calls\":[{\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"get_company_targets\",\"arguments\":\"{}\"}}]}}}

event: done
data: [DONE]

";

const RESUMED_STREAM: &str = "event: thread.message.created
data: {\"id\":\"msg_2\",\"role\":\"assistant\",\"content\":[]}

event: thread.message.delta
data: {\"id\":\"msg_2\",\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"Found 3 targets.\"}}]}}

event: thread.run.completed
data: {\"id\":\"run_1\",\"status\":\"completed\"}

event: done
data: [DONE]

";

struct StubServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl StubServer {
    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

fn sse(body: &'static str) -> axum::response::Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn create_thread(headers: HeaderMap) -> impl IntoResponse {
    if headers.get("OpenAI-Beta").and_then(|v| v.to_str().ok()) != Some("assistants=v2") {
        return (StatusCode::BAD_REQUEST, "missing beta header").into_response();
    }
    Json(json!({ "id": "thread_1", "object": "thread" })).into_response()
}

async fn runs(Path(thread_id): Path<String>, Json(body): Json<Value>) -> impl IntoResponse {
    if thread_id != "thread_1" || body["stream"] != json!(true) {
        return (StatusCode::NOT_FOUND, "no such thread").into_response();
    }
    sse(RUN_STREAM)
}

async fn list_runs(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    Json(json!({
        "object": "list",
        "data": [{ "id": "run_0", "status": "in_progress", "limit_seen": query.get("limit") }]
    }))
}

async fn submit_tool_outputs(
    Path((_thread_id, run_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if run_id != "run_1" || body["tool_outputs"][0]["tool_call_id"] != json!("call_1") {
        return (StatusCode::BAD_REQUEST, "unexpected tool outputs").into_response();
    }
    sse(RESUMED_STREAM)
}

async fn create_message(Json(body): Json<Value>) -> impl IntoResponse {
    Json(json!({
        "id": "msg_1",
        "role": body["role"],
        "content": [{ "type": "text", "text": { "value": body["content"], "annotations": [] } }]
    }))
}

async fn list_messages(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    let id = format!("msg_{}", query.get("order").map_or("none", String::as_str));
    Json(json!({
        "object": "list",
        "data": [{ "id": id, "role": "assistant", "content": [
            { "type": "text", "text": { "value": "Latest answer", "annotations": [] } }
        ]}]
    }))
}

async fn start_stub_assistants_server() -> Result<StubServer, BoxedError> {
    let app = Router::new()
        .route("/threads", post(create_thread))
        .route("/threads/{thread_id}/runs", post(runs).get(list_runs))
        .route(
            "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs",
            post(submit_tool_outputs),
        )
        .route(
            "/threads/{thread_id}/messages",
            post(create_message).get(list_messages),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        if let Err(err) = server.await {
            eprintln!("assistants stub server error: {err}");
        }
    });

    Ok(StubServer {
        url,
        shutdown: Some(shutdown_tx),
        handle,
    })
}

fn client_for(stub: &StubServer) -> OpenAIAssistantClient {
    OpenAIAssistantClient::new(OpenAIAssistantClientOptions {
        base_url: Some(stub.url.clone()),
        api_key: "sk-test".to_string(),
        ..Default::default()
    })
}

#[tokio::test]
async fn run_stream_pauses_for_tool_calls_and_resumes() -> Result<(), BoxedError> {
    let stub = start_stub_assistants_server().await?;
    let client = client_for(&stub);

    let thread = client.create_thread().await?;
    assert_eq!(thread.id, "thread_1");

    let events: Vec<AssistantStreamEvent> = client
        .stream_run(&thread.id, "asst_1")
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        events,
        vec![
            AssistantStreamEvent::RunCreated(Run::new("run_1", RunStatus::Queued)),
            AssistantStreamEvent::RunRequiresAction(Run::requiring(
                "run_1",
                vec![ToolCall::function("call_1", "get_company_targets", "{}")]
            )),
        ]
    );

    let resumed: Vec<AssistantStreamEvent> = client
        .submit_tool_outputs_stream(
            &thread.id,
            "run_1",
            vec![ToolOutput {
                tool_call_id: "call_1".to_string(),
                output: r#"{"success":true}"#.to_string(),
            }],
        )
        .await?
        .try_collect()
        .await?;

    assert_eq!(resumed.len(), 3);
    let AssistantStreamEvent::MessageDelta(delta) = &resumed[1] else {
        panic!("expected a message delta, got {:?}", resumed[1]);
    };
    assert_eq!(delta.id.as_deref(), Some("msg_2"));
    assert_eq!(
        delta.text_fragments().collect::<String>(),
        "Found 3 targets."
    );
    assert_eq!(
        resumed[2],
        AssistantStreamEvent::RunCompleted(Run::new("run_1", RunStatus::Completed))
    );

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn thread_messages_and_runs_are_listed() -> Result<(), BoxedError> {
    let stub = start_stub_assistants_server().await?;
    let client = client_for(&stub);

    let created = client
        .create_message("thread_1", MessageRole::User, "Who buys Acme?")
        .await?;
    assert_eq!(
        created,
        ThreadMessage::text("msg_1", MessageRole::User, "Who buys Acme?")
    );

    let latest = client
        .list_messages("thread_1", MessageOrder::Desc, Some(1))
        .await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].id, "msg_desc");
    assert_eq!(latest[0].text_content(), "Latest answer");

    let runs = client.list_runs("thread_1", 5).await?;
    assert_eq!(runs, vec![Run::new("run_0", RunStatus::InProgress)]);
    assert!(runs[0].status.is_active());

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn rejected_stream_reports_status_and_body() -> Result<(), BoxedError> {
    let stub = start_stub_assistants_server().await?;
    let client = client_for(&stub);

    let Err(err) = client.stream_run("thread_x", "asst_1").await else {
        panic!("unknown thread must not open a stream");
    };
    assert!(
        matches!(err, ProviderError::StatusCode(status, ref body) if status == 404 && body == "no such thread")
    );

    stub.stop().await;
    Ok(())
}
