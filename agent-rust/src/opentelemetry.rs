use crate::{engine::EngineState, orchestrator::JobOutcome};
use futures::Stream;
use opentelemetry::trace::Status;
use std::future::Future;
use tracing::{info_span, Span};
use tracing_futures::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub struct JobSpan {
    span: Span,
}

impl JobSpan {
    pub fn new() -> Self {
        let span = info_span!("dealdesk.job");
        span.set_attribute("dealdesk.operation.name", "run_task");
        Self { span }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn on_outcome(&self, outcome: &JobOutcome) {
        let job = outcome.job();
        if let Some(event_id) = &job.event_id {
            self.span.set_attribute("task.event_id", event_id.clone());
        }
        self.span
            .set_attribute("task.attempts", i64::from(outcome.attempts()));
        self.span.set_attribute(
            "task.artifact_count",
            i64::try_from(job.artifacts.len()).unwrap_or(i64::MAX),
        );

        match outcome {
            JobOutcome::Completed(_) => {
                self.span.set_attribute("task.outcome", "completed");
            }
            JobOutcome::Failed(failed) => {
                self.span.set_attribute("task.outcome", "failed");
                self.span
                    .set_attribute("exception.message", failed.error.to_string());
                self.span.set_status(Status::error(failed.error.to_string()));
            }
            JobOutcome::TimedOut(_) => {
                self.span.set_attribute("task.outcome", "timed_out");
                self.span.set_status(Status::error("task timed out"));
            }
        }
    }
}

pub async fn trace_job<Fut>(future: Fut) -> JobOutcome
where
    Fut: Future<Output = JobOutcome> + Send,
{
    let span = JobSpan::new();
    let outcome = future.instrument(span.span()).await;
    span.on_outcome(&outcome);
    outcome
}

#[derive(Clone)]
pub struct TurnSpan {
    span: Span,
}

impl TurnSpan {
    pub fn new() -> Self {
        let span = info_span!("dealdesk.turn");
        span.set_attribute("dealdesk.operation.name", "send_message");
        Self { span }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn on_thread(&self, thread_id: &str) {
        self.span
            .set_attribute("assistant.thread_id", thread_id.to_string());
    }

    pub fn on_run(&self, run_id: &str) {
        self.span.set_attribute("assistant.run_id", run_id.to_string());
    }

    pub fn on_message(&self, message_id: &str) {
        self.span
            .set_attribute("assistant.message_id", message_id.to_string());
    }

    pub fn on_end(&self, state: EngineState, error: Option<&str>) {
        self.span
            .set_attribute("dealdesk.turn.state", state.as_str());
        if let Some(error) = error {
            self.span.set_attribute("exception.message", error.to_string());
            self.span.set_status(Status::error(error.to_string()));
        }
    }
}

/// Attach the turn span to every poll of the stream.
pub fn trace_turn_stream<S>(span: &TurnSpan, stream: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = String> + Send,
{
    stream.instrument(span.span())
}
