use dealdesk_sdk::TaskApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Assistant provider error: {0}")]
    Provider(#[from] dealdesk_sdk::ProviderError),
    #[error("Task API error: {0}")]
    TaskApi(#[from] TaskApiError),
    /// The assistant run ended in error. Carries the provider's message.
    #[error("Assistant run failed: {0}")]
    ProviderRunFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invariant: {0}")]
    Invariant(String),
}

/// Why a job ended in the `Failed` state.
#[derive(Debug, Error)]
pub enum JobError {
    /// The task API refused the submission. No polling took place.
    #[error("Task submission failed: {0}")]
    Submission(#[source] TaskApiError),
    /// The task API reported the job as failed.
    #[error("Task {event_id} failed after {attempts} status check(s)")]
    Rejected { event_id: String, attempts: u32 },
}

impl JobError {
    /// Raw diagnostic text from the task API, preserved verbatim.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Submission(error) => error.details(),
            Self::Rejected { .. } => None,
        }
    }
}
