pub mod assistants;
mod boxed_stream;
pub mod client_utils;
mod errors;
pub mod sdk_test;
pub mod task;

pub use assistants::{
    AssistantProvider, AssistantStreamEvent, OpenAIAssistantClient, OpenAIAssistantClientOptions,
    RunEventStream,
};
pub use boxed_stream::BoxedStream;
pub use errors::*;
pub use task::{TaskApi, TaskClient, TaskClientOptions};
