use thiserror::Error;

/// Errors returned by the task API client.
#[derive(Error, Debug)]
pub enum TaskApiError {
    /// The task API rejected the payload as unprocessable (HTTP 422).
    /// Carries the raw response body.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The request to the task API failed or its body could not be read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The request returns a non-success status code other than 422
    #[error("Status error: {1} (Status {0})")]
    StatusCode(reqwest::StatusCode, String),
    /// The response did not have the expected shape.
    #[error("Invariant: {0}")]
    Invariant(String),
}

impl TaskApiError {
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Network and HTTP-level failures. These are retryable at the caller's
    /// discretion.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::StatusCode(..))
    }

    /// The raw diagnostic text returned by the task API, if any.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Validation(body) | Self::StatusCode(_, body) => Some(body),
            Self::Transport(_) | Self::Invariant(_) => None,
        }
    }
}

pub type TaskApiResult<T> = Result<T, TaskApiError>;

/// Errors returned by the assistants provider client.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request to the provider failed or the parsing of the response
    /// failed.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The request returns a non-OK status code
    #[error("Status error: {1} (Status {0})")]
    StatusCode(reqwest::StatusCode, String),
    /// The response from the provider was unexpected. (e.g. a stream event
    /// whose payload does not match its event name)
    #[error("Invariant from {0}: {1}")]
    Invariant(&'static str, String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
