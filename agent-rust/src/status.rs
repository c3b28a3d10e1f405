//! Single-slot status display shared by the conversation engine and the
//! task orchestrator. The last write wins; nothing is queued.

use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusUpdate {
    pub fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Cloneable handle to the status slot. Every clone writes to the same slot.
#[derive(Clone)]
pub struct StatusSink {
    slot: Arc<watch::Sender<Option<StatusUpdate>>>,
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink {
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Replace whatever is displayed.
    pub fn set(&self, update: StatusUpdate) {
        debug!(level = ?update.level, text = %update.text, "status");
        self.slot.send_replace(Some(update));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.set(StatusUpdate::new(StatusLevel::Info, text));
    }

    pub fn success(&self, text: impl Into<String>) {
        self.set(StatusUpdate::new(StatusLevel::Success, text));
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.set(StatusUpdate::new(StatusLevel::Warning, text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.set(StatusUpdate::new(StatusLevel::Error, text));
    }

    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    #[must_use]
    pub fn current(&self) -> Option<StatusUpdate> {
        self.slot.borrow().clone()
    }

    /// Watch the slot. Receivers only ever observe the latest value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<StatusUpdate>> {
        self.slot.subscribe()
    }
}
