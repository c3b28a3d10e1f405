//! Short texts shown on the status sink while an assistant run progresses.

use rand::seq::SliceRandom;

const RUN_CREATED: &[&str] = &["Noting that down...", "Hm?", "Got it..."];
const RUN_QUEUED: &[&str] = &[
    "A little preparation...",
    "Coming up...",
    "Making some room...",
    "Settling in...",
];
const RUN_IN_PROGRESS: &[&str] = &["Hm...", "Here we go...", "Getting to it...", "Thinking..."];

pub const STEP_MESSAGE_CREATION: &str = "Let me see...";
pub const STEP_TOOL_CALLS: &str = "Preparing the request...";
pub const RETRIEVING_ANSWER: &str = "Retrieving the answer...";

pub fn run_created() -> &'static str {
    pick(RUN_CREATED)
}

pub fn run_queued() -> &'static str {
    pick(RUN_QUEUED)
}

pub fn run_in_progress() -> &'static str {
    pick(RUN_IN_PROGRESS)
}

/// Phrase for a run step, keyed by the step's `type`.
pub fn step(kind: &str) -> Option<&'static str> {
    match kind {
        "message_creation" => Some(STEP_MESSAGE_CREATION),
        "tool_calls" => Some(STEP_TOOL_CALLS),
        _ => None,
    }
}

/// Phrase shown while a tool call's job runs.
pub fn tool(function_name: &str) -> &'static str {
    if function_name == "get_company_targets" {
        "Searching for companies..."
    } else {
        "Searching for transactions..."
    }
}

fn pick(phrases: &'static [&'static str]) -> &'static str {
    phrases
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_phrases_come_from_their_pool() {
        for _ in 0..20 {
            assert!(RUN_CREATED.contains(&run_created()));
            assert!(RUN_QUEUED.contains(&run_queued()));
            assert!(RUN_IN_PROGRESS.contains(&run_in_progress()));
        }
    }

    #[test]
    fn step_and_tool_phrases() {
        assert_eq!(step("message_creation"), Some("Let me see..."));
        assert_eq!(step("tool_calls"), Some("Preparing the request..."));
        assert_eq!(step("other"), None);
        assert_eq!(tool("get_company_targets"), "Searching for companies...");
        assert_eq!(tool("get_transactions"), "Searching for transactions...");
    }
}
