use crate::{artifact::Artifact, artifact::ArtifactRegistry, engine::EngineState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn as the renderer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Assigned by the provider once it confirms the message. Used to look
    /// up artifacts in the [`ArtifactRegistry`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            message_id: None,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// One conversation thread and everything tied to it. Lives as long as the
/// user's authenticated session; [`Session::reset`] drops it all.
pub struct Session {
    thread_id: Option<String>,
    messages: Vec<Message>,
    /// Artifacts produced by finished jobs that wait for the next message.
    pending: Vec<Artifact>,
    registry: ArtifactRegistry,
    current_message_id: Option<String>,
    state: EngineState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ArtifactRegistry::new())
    }
}

impl Session {
    #[must_use]
    pub fn new(registry: ArtifactRegistry) -> Self {
        Self {
            thread_id: None,
            messages: vec![],
            pending: vec![],
            registry,
            current_message_id: None,
            state: EngineState::Idle,
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// The transcript recorded by the engine, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn pending_artifacts(&self) -> &[Artifact] {
        &self.pending
    }

    #[must_use]
    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Id of the assistant message produced by the latest turn.
    #[must_use]
    pub fn current_message_id(&self) -> Option<&str> {
        self.current_message_id.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Artifacts tied to a transcript message.
    #[must_use]
    pub fn artifacts_for(&self, message: &Message) -> Vec<Artifact> {
        message
            .message_id
            .as_deref()
            .map(|id| self.registry.artifacts(id))
            .unwrap_or_default()
    }

    pub(crate) fn set_thread_id(&mut self, thread_id: String) {
        self.thread_id = Some(thread_id);
    }

    pub(crate) fn set_state(&mut self, state: EngineState) {
        self.state = state;
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Clears the latched message and returns it.
    pub(crate) fn start_turn(&mut self) -> Option<String> {
        self.state = EngineState::Idle;
        self.current_message_id.take()
    }

    pub(crate) fn hold_pending(&mut self, artifacts: Vec<Artifact>) {
        self.pending.extend(artifacts);
    }

    /// Make `message_id` the current message and give it a registry slot.
    pub(crate) fn latch_message(&mut self, message_id: &str) {
        self.registry.init_slot(message_id);
        self.current_message_id = Some(message_id.to_string());
    }

    /// Move every pending artifact to the message's slot. Returns how many
    /// were moved.
    pub(crate) fn flush_pending(&mut self, message_id: &str) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        if count > 0 {
            self.registry.attach(message_id, pending);
        }
        count
    }

    pub(crate) fn reset(&mut self) {
        self.thread_id = None;
        self.messages.clear();
        self.pending.clear();
        self.registry.clear();
        self.current_message_id = None;
        self.state = EngineState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::test_artifact;

    #[test]
    fn pending_artifacts_go_to_the_flushing_message_only() {
        let mut session = Session::default();

        session.latch_message("msg_1");
        session.hold_pending(vec![test_artifact("f1", "out.csv", "csv")]);
        assert_eq!(session.pending_artifacts().len(), 1);

        session.latch_message("msg_2");
        assert_eq!(session.flush_pending("msg_2"), 1);
        assert!(session.pending_artifacts().is_empty());
        assert_eq!(session.flush_pending("msg_3"), 0);

        let earlier = Message::assistant("first").with_message_id("msg_1");
        let later = Message::assistant("second").with_message_id("msg_2");
        assert!(session.artifacts_for(&earlier).is_empty());
        assert_eq!(session.artifacts_for(&later)[0].filename, "out.csv");
        assert!(session.artifacts_for(&Message::user("hi")).is_empty());
        assert!(!session.registry().has_slot("msg_3"));
    }

    #[test]
    fn start_turn_hands_back_the_previous_message_id() {
        let mut session = Session::new(ArtifactRegistry::new());
        session.latch_message("msg_1");
        session.set_state(EngineState::Done);

        assert_eq!(session.start_turn().as_deref(), Some("msg_1"));
        assert_eq!(session.current_message_id(), None);
        assert_eq!(session.state(), EngineState::Idle);
        assert!(session.registry().has_slot("msg_1"));
    }

    #[test]
    fn reset_drops_thread_transcript_and_artifacts() {
        let registry = ArtifactRegistry::new();
        let mut session = Session::new(registry.clone());
        session.set_thread_id("thread_1".to_string());
        session.push_message(Message::user("hello"));
        session.latch_message("msg_1");
        session.hold_pending(vec![test_artifact("f1", "a.csv", "csv")]);
        session.flush_pending("msg_1");
        session.hold_pending(vec![test_artifact("f2", "b.csv", "csv")]);

        session.reset();

        assert_eq!(session.thread_id(), None);
        assert!(session.messages().is_empty());
        assert!(session.pending_artifacts().is_empty());
        assert_eq!(session.current_message_id(), None);
        assert!(registry.message_ids().is_empty());
    }

    #[test]
    fn message_serializes_without_missing_id() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }
}
