//! Drives one long-running job through the task API:
//! `Submitted -> Polling -> {Completed | Failed | TimedOut}`.
//!
//! Submission failures are terminal and never retried. Transient status
//! check failures, unknown statuses and individual download failures are
//! surfaced as warnings while the job carries on.

use crate::{
    artifact::{Artifact, MediaKind},
    errors::JobError,
    opentelemetry::trace_job,
    status::StatusSink,
};
use dealdesk_sdk::task::{FileDescriptor, JobSnapshot, TaskApi};
use futures::lock::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Polling parameters.
/// # Default Values
/// - `poll_interval`: 2 seconds
/// - `max_attempts`: 60
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Wait before every status check.
    pub poll_interval: Duration,
    /// Status checks allowed before the job is declared timed out.
    pub max_attempts: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Assigned by the task API on submission.
    pub event_id: Option<String>,
    pub status: JobStatus,
    pub payload: Value,
    /// Populated only on completion.
    pub artifacts: Vec<Artifact>,
}

impl Job {
    fn new(payload: Value) -> Self {
        Self {
            event_id: None,
            status: JobStatus::Submitted,
            payload,
            artifacts: vec![],
        }
    }
}

#[derive(Debug)]
pub struct CompletedJob {
    pub job: Job,
    /// The final snapshot returned by the task API.
    pub snapshot: JobSnapshot,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct FailedJob {
    pub job: Job,
    pub attempts: u32,
    pub error: JobError,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct TimedOutJob {
    pub job: Job,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

/// Terminal result of [`TaskOrchestrator::run`].
#[derive(Debug)]
pub enum JobOutcome {
    Completed(CompletedJob),
    Failed(FailedJob),
    /// The attempt budget ran out. Kept apart from `Failed` so callers can
    /// offer a retry.
    TimedOut(TimedOutJob),
}

impl JobOutcome {
    #[must_use]
    pub fn job(&self) -> &Job {
        match self {
            Self::Completed(completed) => &completed.job,
            Self::Failed(failed) => &failed.job,
            Self::TimedOut(timed_out) => &timed_out.job,
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.job().status
    }

    /// Status checks performed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed(completed) => completed.attempts,
            Self::Failed(failed) => failed.attempts,
            Self::TimedOut(timed_out) => timed_out.attempts,
        }
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Completed(completed) => &completed.warnings,
            Self::Failed(failed) => &failed.warnings,
            Self::TimedOut(timed_out) => &timed_out.warnings,
        }
    }
}

/// Runs jobs against the task API, reporting progress on the shared
/// status sink.
pub struct TaskOrchestrator {
    client: Arc<dyn TaskApi>,
    options: OrchestratorOptions,
    status: StatusSink,
    in_flight: Mutex<()>,
}

impl TaskOrchestrator {
    #[must_use]
    pub fn new(client: Arc<dyn TaskApi>, status: StatusSink) -> Self {
        Self {
            client,
            options: OrchestratorOptions::default(),
            status,
            in_flight: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn options(&self) -> OrchestratorOptions {
        self.options
    }

    #[must_use]
    pub fn status_sink(&self) -> &StatusSink {
        &self.status
    }

    /// Submit the payload and poll until the job reaches a terminal state.
    /// Only one job is polled at a time per orchestrator; concurrent callers
    /// wait their turn.
    pub async fn run(&self, payload: Value) -> JobOutcome {
        let _in_flight = self.in_flight.lock().await;
        trace_job(self.run_job(payload)).await
    }

    async fn run_job(&self, payload: Value) -> JobOutcome {
        let mut job = Job::new(payload);

        self.status.info("Submitting the task...");

        let event_id = match self.client.submit(&job.payload).await {
            Ok(submitted) => submitted.event_id,
            Err(error) => {
                warn!(%error, "task submission failed");
                self.status.error(format!("Error: {error}"));
                job.status = JobStatus::Failed;
                return JobOutcome::Failed(FailedJob {
                    job,
                    attempts: 0,
                    error: JobError::Submission(error),
                    warnings: vec![],
                });
            }
        };

        info!(%event_id, "task submitted");
        job.event_id = Some(event_id.clone());
        self.status.info(format!(
            "Task submitted (ID: {event_id}). Processing..."
        ));

        let max_attempts = self.options.max_attempts;
        let mut warnings = Vec::new();

        for attempt in 1..=max_attempts {
            sleep(self.options.poll_interval).await;
            job.status = JobStatus::Processing;

            self.status
                .info(format!("Checking status... ({attempt}/{max_attempts})"));

            let snapshot = match self.client.check_status(&event_id).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    let warning = format!("Status check failed: {error}");
                    warn!(%event_id, attempt, %error, "status check failed");
                    self.warn(&mut warnings, warning);
                    continue;
                }
            };

            debug!(%event_id, attempt, status = %snapshot.status, "task status");

            match snapshot.status.as_str() {
                "completed" => {
                    self.status.success("Processing complete!");
                    return JobOutcome::Completed(
                        self.collect(job, snapshot, attempt, warnings).await,
                    );
                }
                "failed" => {
                    warn!(%event_id, attempt, "task reported failure");
                    self.status.error(format!("Task {event_id} failed"));
                    job.status = JobStatus::Failed;
                    return JobOutcome::Failed(FailedJob {
                        job,
                        attempts: attempt,
                        error: JobError::Rejected {
                            event_id,
                            attempts: attempt,
                        },
                        warnings,
                    });
                }
                "processing" => {
                    self.status.info(self.progress_text(&snapshot, attempt));
                }
                other => {
                    let warning = format!("Unexpected status: {other}");
                    warn!(%event_id, attempt, status = other, "unexpected task status");
                    self.warn(&mut warnings, warning);
                }
            }
        }

        warn!(%event_id, max_attempts, "task timed out");
        self.status.error("Timed out waiting for the task");
        job.status = JobStatus::TimedOut;

        JobOutcome::TimedOut(TimedOutJob {
            job,
            attempts: max_attempts,
            warnings,
        })
    }

    fn warn(&self, warnings: &mut Vec<String>, warning: String) {
        self.status.warning(warning.clone());
        warnings.push(warning);
    }

    fn progress_text(&self, snapshot: &JobSnapshot, attempt: u32) -> String {
        if let Some(node) = snapshot.latest_node() {
            format!(
                "In progress: {} - {}",
                node.name.as_deref().unwrap_or("Processing"),
                node.status.as_deref().unwrap_or("running")
            )
        } else {
            let elapsed = seconds_after(self.options.poll_interval, attempt);
            let budget = seconds_after(self.options.poll_interval, self.options.max_attempts);
            format!("Processing... ({elapsed}/{budget}s)")
        }
    }

    async fn collect(
        &self,
        mut job: Job,
        snapshot: JobSnapshot,
        attempts: u32,
        mut warnings: Vec<String>,
    ) -> CompletedJob {
        if !snapshot.files.is_empty() {
            self.status
                .info(format!("Downloading {} file(s)...", snapshot.files.len()));
        }

        for file in &snapshot.files {
            match self.download(file).await {
                Ok(artifact) => job.artifacts.push(artifact),
                Err(error) => {
                    let warning = format!("Failed to download file {}: {error}", file.filename);
                    warn!(file_id = %file.id, %error, "file download failed");
                    self.warn(&mut warnings, warning);
                }
            }
        }

        info!(
            event_id = job.event_id.as_deref().unwrap_or_default(),
            artifacts = job.artifacts.len(),
            "task completed"
        );

        self.status.clear();
        job.status = JobStatus::Completed;

        CompletedJob {
            job,
            snapshot,
            attempts,
            warnings,
        }
    }

    async fn download(
        &self,
        file: &FileDescriptor,
    ) -> Result<Artifact, dealdesk_sdk::TaskApiError> {
        let downloaded = self.client.download_file(&file.id).await?;
        Ok(Artifact {
            id: file.id.clone(),
            filename: file.filename.clone(),
            media_kind: MediaKind::from_type_hint(
                &file.file_type,
                downloaded.content_type.as_deref(),
            ),
            type_hint: file.file_type.clone(),
            bytes: downloaded.bytes,
            content_type: downloaded.content_type,
        })
    }
}

/// Whole seconds spent by `count` polls, saturating at `u64::MAX`.
fn seconds_after(interval: Duration, count: u32) -> u64 {
    interval
        .checked_mul(count)
        .map_or(u64::MAX, |elapsed| elapsed.as_secs())
}
