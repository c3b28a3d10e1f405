//! Mock collaborators for tests. They track their inputs and yield
//! predefined outputs in the order they were enqueued.

mod assistants;
mod task;

pub use assistants::{MockAssistantProvider, MockStreamResult, SubmittedToolOutputs};
pub use task::MockTaskApi;
