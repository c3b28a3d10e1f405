pub mod artifact;
pub mod config;
pub mod engine;
mod errors;
mod opentelemetry;
pub mod orchestrator;
mod phrases;
pub mod session;
pub mod status;

pub use artifact::{Artifact, ArtifactRegistry, MediaKind};
pub use config::AppConfig;
pub use engine::{
    ConversationEngine, EngineOptions, EngineState, TimedOutOutputPolicy, ToolResult, TurnStream,
};
pub use errors::{AgentError, JobError};
pub use orchestrator::{
    CompletedJob, FailedJob, Job, JobOutcome, JobStatus, OrchestratorOptions, TaskOrchestrator,
    TimedOutJob,
};
pub use session::{Message, Role, Session};
pub use status::{StatusLevel, StatusSink, StatusUpdate};
