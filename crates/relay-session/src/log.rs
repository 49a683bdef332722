use relay_core::{Message, MessageStatus, RelayError, RelayResult, SyncState, ToolCall};
use std::collections::HashSet;
use tracing::warn;

/// Handle to an assistant message opened for streaming.
///
/// Only the log can resolve a handle; holding one grants no access to the
/// message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    id: String,
}

impl StreamHandle {
    /// Id of the message this handle points at.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Ordered, append-only message sequence for one session.
///
/// Messages are kept sorted by `created_at`; messages with equal timestamps
/// keep their insertion order. The only in-place mutation allowed is streaming
/// accumulation into an assistant message that is still open.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message at its chronological position.
    ///
    /// A message whose id is already present is rejected and the log is left
    /// unchanged.
    pub fn append(&mut self, message: Message) -> RelayResult<()> {
        if self.ids.contains(&message.id) {
            warn!(message_id = %message.id, "duplicate message rejected");
            return Err(RelayError::DuplicateMessage(message.id));
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(at, message);
        Ok(())
    }

    /// Opens an empty assistant message for streaming.
    pub fn begin_streaming_assistant_message(
        &mut self,
        id: impl Into<String>,
    ) -> RelayResult<StreamHandle> {
        let message = Message::streaming_assistant(id);
        let handle = StreamHandle {
            id: message.id.clone(),
        };
        self.append(message)?;
        Ok(handle)
    }

    /// Concatenates a text chunk onto the open message.
    pub fn append_delta(&mut self, handle: &StreamHandle, chunk: &str) -> RelayResult<()> {
        self.open_mut(handle)?.content.push_str(chunk);
        Ok(())
    }

    /// Adds a tool call to the open message. A repeated call id is ignored.
    pub fn attach_tool_call(&mut self, handle: &StreamHandle, call: ToolCall) -> RelayResult<()> {
        let message = self.open_mut(handle)?;
        if message.tools.iter().any(|t| t.id == call.id) {
            warn!(message_id = %handle.id, tool_call_id = %call.id, "tool call already attached");
            return Ok(());
        }
        message.tools.push(call);
        Ok(())
    }

    /// Records the result of a pending tool call.
    ///
    /// Returns `Ok(false)` without touching the log when no unresolved call
    /// with that id exists; results can overtake their calls on the wire.
    pub fn resolve_tool_call(
        &mut self,
        handle: &StreamHandle,
        tool_call_id: &str,
        result: impl Into<String>,
    ) -> RelayResult<bool> {
        let message = self.open_mut(handle)?;
        match message
            .tools
            .iter_mut()
            .find(|t| t.id == tool_call_id && !t.is_resolved())
        {
            Some(call) => {
                call.result = Some(result.into());
                Ok(true)
            }
            None => {
                warn!(
                    message_id = %handle.id,
                    tool_call_id = %tool_call_id,
                    "tool result without a pending call ignored"
                );
                Ok(false)
            }
        }
    }

    /// Closes the open message. Any later mutation through the handle is a
    /// protocol anomaly.
    pub fn finalize(&mut self, handle: &StreamHandle) -> RelayResult<()> {
        self.open_mut(handle)?.status = MessageStatus::Complete;
        Ok(())
    }

    /// Moves a message to a new delivery state.
    ///
    /// Returns `Ok(false)` if the id is not in the log and
    /// `RelayError::Validation` for an illegal transition.
    pub fn set_sync(&mut self, id: &str, state: SyncState) -> RelayResult<bool> {
        let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == id) else {
            return Ok(false);
        };
        if !message.sync.can_transition_to(state) {
            return Err(RelayError::Validation(format!(
                "message {id}: cannot move from {:?} to {state:?}",
                message.sync
            )));
        }
        message.sync = state;
        Ok(true)
    }

    /// Replaces the whole log, e.g. after switching sessions.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        let mut messages = messages;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for message in messages {
            if !self.ids.insert(message.id.clone()) {
                warn!(message_id = %message.id, "duplicate message dropped while loading");
                continue;
            }
            self.messages.push(message);
        }
    }

    /// Removes every message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    /// Ordered copy of the log.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    // The open message is almost always the newest one, so search from the end.
    fn open_mut(&mut self, handle: &StreamHandle) -> RelayResult<&mut Message> {
        let message = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == handle.id)
            .ok_or_else(|| {
                RelayError::ProtocolAnomaly(format!("message {} is not in the log", handle.id))
            })?;
        if !message.is_streaming() {
            return Err(RelayError::ProtocolAnomaly(format!(
                "message {} is already finalized",
                handle.id
            )));
        }
        Ok(message)
    }
}
