use crate::tool::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or notice.
    System,
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Message body: plain text, or a structured JSON payload sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text (the only form streaming produces).
    Text(String),
    /// Any other JSON value.
    Structured(serde_json::Value),
}

impl MessageContent {
    /// Returns the text form of the content. Structured content is rendered as
    /// compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Structured(value) => value.to_string(),
        }
    }

    /// Borrow the content as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Structured(_) => None,
        }
    }

    /// Appends a text chunk. Structured content is first turned into text.
    pub fn push_str(&mut self, chunk: &str) {
        match self {
            MessageContent::Text(text) => text.push_str(chunk),
            MessageContent::Structured(value) => {
                let mut text = value.to_string();
                text.push_str(chunk);
                *self = MessageContent::Text(text);
            }
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// Whether a message can still receive streamed content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Open for deltas and tool events.
    Streaming,
    /// Closed. No further mutation is permitted.
    #[default]
    Complete,
}

/// Reconciliation state of a locally authored message.
///
/// Messages start as `Pending` when appended optimistically and move to
/// `Confirmed` once the server accepted the request, or `Failed` when the
/// transport gave up. A `Failed` message may go back to `Pending` when the
/// user resends it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Sent, not yet acknowledged.
    Pending,
    /// Acknowledged by the server (or loaded from it).
    #[default]
    Confirmed,
    /// Delivery failed.
    Failed,
}

impl SyncState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (SyncState::Pending, SyncState::Confirmed)
                | (SyncState::Pending, SyncState::Failed)
                | (SyncState::Failed, SyncState::Pending)
        )
    }
}

/// A single message within a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier, unique within its session.
    pub id: String,
    /// The role of the message author.
    pub role: Role,
    /// The body of the message.
    #[serde(default)]
    pub content: MessageContent,
    /// UTC timestamp used to order the log.
    pub created_at: DateTime<Utc>,
    /// Tool invocations attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCall>,
    /// Streaming status.
    #[serde(default)]
    pub status: MessageStatus,
    /// Delivery state for optimistic messages.
    #[serde(default)]
    pub sync: SyncState,
    /// Set on messages that surface a server-reported stream error.
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    /// Creates a complete, confirmed message with a fresh UUID.
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            tools: Vec::new(),
            status: MessageStatus::Complete,
            sync: SyncState::Confirmed,
            is_error: false,
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message appended before the server has seen it.
    pub fn optimistic_user(content: impl Into<MessageContent>) -> Self {
        Self {
            sync: SyncState::Pending,
            ..Self::user(content)
        }
    }

    /// An empty assistant message in [`MessageStatus::Streaming`].
    pub fn streaming_assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: MessageStatus::Streaming,
            ..Self::assistant(MessageContent::default())
        }
    }

    /// A visible error notice produced from a server error chunk.
    pub fn stream_error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(MessageContent::Text(text.into()))
        }
    }

    /// Overrides the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether the message is still receiving streamed content.
    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Text form of the content.
    pub fn text(&self) -> String {
        self.content.to_text()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello");
        assert_eq!(msg.sync, SyncState::Confirmed);
        assert!(!msg.is_streaming());
    }

    #[test]
    fn test_optimistic_user_is_pending() {
        let msg = Message::optimistic_user("gm");
        assert_eq!(msg.sync, SyncState::Pending);
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn test_streaming_assistant_starts_empty() {
        let msg = Message::streaming_assistant("a1");
        assert_eq!(msg.id, "a1");
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.is_streaming());
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn test_server_message_defaults() {
        let json = r#"{"id":"m1","role":"assistant","content":"hi","createdAt":"2024-05-01T10:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert_eq!(msg.sync, SyncState::Confirmed);
        assert!(msg.tools.is_empty());
        assert!(!msg.is_error);
    }

    #[test]
    fn test_structured_content() {
        let json = r#"{"id":"m2","role":"tool","content":{"balance":"42"},"createdAt":"2024-05-01T10:00:00Z"}"#;
        let mut msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.content.as_text().is_none());
        assert_eq!(msg.text(), r#"{"balance":"42"}"#);

        msg.content.push_str("!");
        assert_eq!(msg.content.as_text(), Some(r#"{"balance":"42"}!"#));
    }

    #[test]
    fn test_sync_transitions() {
        assert!(SyncState::Pending.can_transition_to(SyncState::Confirmed));
        assert!(SyncState::Pending.can_transition_to(SyncState::Failed));
        assert!(SyncState::Failed.can_transition_to(SyncState::Pending));
        assert!(!SyncState::Confirmed.can_transition_to(SyncState::Failed));
        assert!(!SyncState::Failed.can_transition_to(SyncState::Confirmed));
    }
}
