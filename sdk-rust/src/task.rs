//! Client for the long-running task API.
//!
//! The API accepts a job (`POST /events`), reports its progress
//! (`GET /events/{id}`) and serves the files it produced (`GET /files/{id}`).
//! The client is a thin request/response wrapper: no retries, no state
//! beyond the current call.

use crate::{TaskApiError, TaskApiResult};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.arcadia-agents.com";

/// Response of a successful submission (HTTP 202).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub event_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// A file produced by a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    #[serde(default = "FileDescriptor::default_filename")]
    pub filename: String,
    /// Media hint as reported by the task API (`image`, `csv`, `excel`, ...).
    #[serde(rename = "type", default = "FileDescriptor::default_type")]
    pub file_type: String,
}

impl FileDescriptor {
    fn default_filename() -> String {
        "unknown".to_string()
    }

    fn default_type() -> String {
        "unknown".to_string()
    }
}

/// A named sub-step of a job, used only for progress display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub nodes: Vec<TaskNode>,
}

/// The state of a job as reported by `GET /events/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Raw status string. Known values are `processing`, `completed` and
    /// `failed`; anything else is passed through untouched.
    pub status: String,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_context: Option<TaskContext>,
    /// Any other fields returned by the task API.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSnapshot {
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            files: vec![],
            task_context: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<FileDescriptor>) -> Self {
        self.files = files;
        self
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<TaskNode>) -> Self {
        self.task_context = Some(TaskContext { nodes });
        self
    }

    /// The most recent sub-step, if the task API reported any.
    #[must_use]
    pub fn latest_node(&self) -> Option<&TaskNode> {
        self.task_context
            .as_ref()
            .and_then(|context| context.nodes.last())
    }
}

/// Raw content of a downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// The task API surface. Implemented over HTTP by [`TaskClient`] and by
/// `sdk_test::MockTaskApi` in tests.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Submit a job payload. Fails with [`TaskApiError::Validation`] when
    /// the API reports the payload as unprocessable.
    async fn submit(&self, payload: &Value) -> TaskApiResult<SubmitResponse>;
    /// Fetch the current state of a job.
    async fn check_status(&self, event_id: &str) -> TaskApiResult<JobSnapshot>;
    /// Download a file produced by a job.
    async fn download_file(&self, file_id: &str) -> TaskApiResult<DownloadedFile>;
}

#[derive(Clone, Default)]
pub struct TaskClientOptions {
    pub base_url: Option<String>,
    pub api_key: String,
    pub client: Option<Client>,
}

pub struct TaskClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl TaskClient {
    #[must_use]
    pub fn new(options: TaskClientOptions) -> Self {
        let TaskClientOptions {
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

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
    }
}

async fn status_error(response: reqwest::Response) -> TaskApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        TaskApiError::Validation(body)
    } else {
        TaskApiError::StatusCode(status, body)
    }
}

#[async_trait]
impl TaskApi for TaskClient {
    async fn submit(&self, payload: &Value) -> TaskApiResult<SubmitResponse> {
        debug!("submitting task to /events");

        let response = self
            .client
            .post(format!("{}/events", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| TaskApiError::Invariant(format!("Failed to parse submit response: {e}")))
    }

    async fn check_status(&self, event_id: &str) -> TaskApiResult<JobSnapshot> {
        debug!(event_id, "checking task status");

        let response = self.get(&format!("/events/{event_id}")).send().await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| TaskApiError::Invariant(format!("Failed to parse task status: {e}")))
    }

    async fn download_file(&self, file_id: &str) -> TaskApiResult<DownloadedFile> {
        debug!(file_id, "downloading task file");

        let response = self.get(&format!("/files/{file_id}")).send().await?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response).await);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let bytes = response.bytes().await?.to_vec();

        Ok(DownloadedFile {
            bytes,
            content_type,
        })
    }
}
