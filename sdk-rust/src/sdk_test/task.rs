use std::{collections::VecDeque, sync::Mutex};

use serde_json::Value;

use crate::{
    errors::{TaskApiError, TaskApiResult},
    task::{DownloadedFile, JobSnapshot, SubmitResponse, TaskApi},
};

#[derive(Default)]
struct MockTaskApiState {
    mocked_submit_results: VecDeque<TaskApiResult<SubmitResponse>>,
    mocked_status_results: VecDeque<TaskApiResult<JobSnapshot>>,
    mocked_download_results: VecDeque<TaskApiResult<DownloadedFile>>,
    tracked_payloads: Vec<Value>,
    tracked_status_checks: Vec<String>,
    tracked_downloads: Vec<String>,
}

/// A mock task API that tracks requests and yields predefined results.
#[derive(Default)]
pub struct MockTaskApi {
    state: Mutex<MockTaskApiState>,
}

impl MockTaskApi {
    /// Construct a new mock task API instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the result of the next `submit` call.
    pub fn enqueue_submit(&self, result: TaskApiResult<SubmitResponse>) -> &Self {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_submit_results.push_back(result);
        drop(state);
        self
    }

    /// Convenience to enqueue an accepted submission.
    pub fn enqueue_accepted(&self, event_id: &str) -> &Self {
        self.enqueue_submit(Ok(SubmitResponse {
            event_id: event_id.to_string(),
            message: Some("Event accepted".to_string()),
        }))
    }

    /// Enqueue one or more `check_status` results.
    pub fn enqueue_status_results<I>(&self, results: I) -> &Self
    where
        I: IntoIterator<Item = TaskApiResult<JobSnapshot>>,
    {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_status_results.extend(results);
        drop(state);
        self
    }

    /// Convenience to enqueue a single successful `check_status` result.
    pub fn enqueue_status(&self, snapshot: JobSnapshot) -> &Self {
        self.enqueue_status_results(std::iter::once(Ok(snapshot)))
    }

    /// Enqueue the result of the next `download_file` call.
    pub fn enqueue_download(&self, result: TaskApiResult<DownloadedFile>) -> &Self {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.mocked_download_results.push_back(result);
        drop(state);
        self
    }

    /// Payloads passed to `submit` so far.
    pub fn tracked_payloads(&self) -> Vec<Value> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_payloads.clone()
    }

    /// Event ids passed to `check_status` so far.
    pub fn tracked_status_checks(&self) -> Vec<String> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_status_checks.clone()
    }

    /// File ids passed to `download_file` so far.
    pub fn tracked_downloads(&self) -> Vec<String> {
        let state = self.state.lock().expect("mock state poisoned");
        state.tracked_downloads.clone()
    }
}

fn exhausted(kind: &str) -> TaskApiError {
    TaskApiError::Invariant(format!("no mocked {kind} results available"))
}

#[async_trait::async_trait]
impl TaskApi for MockTaskApi {
    async fn submit(&self, payload: &Value) -> TaskApiResult<SubmitResponse> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.tracked_payloads.push(payload.clone());
        state
            .mocked_submit_results
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("submit")))
    }

    async fn check_status(&self, event_id: &str) -> TaskApiResult<JobSnapshot> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.tracked_status_checks.push(event_id.to_string());
        state
            .mocked_status_results
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("status")))
    }

    async fn download_file(&self, file_id: &str) -> TaskApiResult<DownloadedFile> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.tracked_downloads.push(file_id.to_string());
        state
            .mocked_download_results
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("download")))
    }
}
