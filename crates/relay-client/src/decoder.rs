use crate::stream::{decode_chunk, StreamChunk};
use relay_core::{Message, RelayError, RelayResult};
use relay_session::{MessageLog, SessionStore, StreamHandle};
use tracing::{debug, warn};
use uuid::Uuid;

/// Where the decoder stands with respect to the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderState {
    /// No active stream.
    Idle,
    /// Chunks of `generation` flow into the message behind `handle`.
    Open {
        generation: u64,
        handle: StreamHandle,
    },
    /// The stream of `generation` ended abnormally.
    Errored { generation: u64, message: String },
}

/// What happened to a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk mutated the log or session store.
    Applied,
    /// The chunk belonged to an abandoned generation.
    Stale,
    /// The chunk was malformed or did not fit the current state. Logged.
    Ignored,
    /// The server reported an error; the stream is closed.
    Errored(String),
}

/// Folds a response stream into the message log.
///
/// Every response gets a generation number from [`StreamDecoder::reserve`].
/// Chunks carry that number back in, and anything tagged with an older
/// generation is dropped before it can touch the log.
#[derive(Debug)]
pub struct StreamDecoder {
    generation: u64,
    state: DecoderState,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            generation: 0,
            state: DecoderState::Idle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, DecoderState::Open { .. })
    }

    /// Starts a new generation, abandoning the previous one.
    ///
    /// An open message is force-finalized with whatever it accumulated.
    pub fn reserve(&mut self, log: &mut MessageLog) -> u64 {
        self.abandon(log);
        self.generation += 1;
        debug!(generation = self.generation, "Stream generation reserved");
        self.generation
    }

    /// Allocates the streaming assistant message for `generation`.
    pub fn open(&mut self, generation: u64, log: &mut MessageLog) -> RelayResult<StreamHandle> {
        if !self.is_current(generation) {
            return Err(RelayError::ProtocolAnomaly(format!(
                "generation {generation} is stale (current {})",
                self.generation
            )));
        }
        if let DecoderState::Open { handle, .. } = &self.state {
            return Err(RelayError::ProtocolAnomaly(format!(
                "generation {generation} already streaming into {}",
                handle.id()
            )));
        }
        let handle = log.begin_streaming_assistant_message(Uuid::new_v4().to_string())?;
        self.state = DecoderState::Open {
            generation,
            handle: handle.clone(),
        };
        Ok(handle)
    }

    /// Decodes a raw payload and applies it.
    pub fn apply(
        &mut self,
        generation: u64,
        payload: &str,
        log: &mut MessageLog,
        sessions: &mut SessionStore,
    ) -> ChunkOutcome {
        if !self.is_current(generation) {
            return ChunkOutcome::Stale;
        }
        match decode_chunk(payload) {
            Ok(chunk) => self.apply_chunk(generation, chunk, log, sessions),
            Err(e) => {
                warn!(generation, error = %e, "undecodable chunk dropped");
                ChunkOutcome::Ignored
            }
        }
    }

    /// Applies an already decoded chunk. Chunks are handled strictly in the
    /// order they are passed in.
    pub fn apply_chunk(
        &mut self,
        generation: u64,
        chunk: StreamChunk,
        log: &mut MessageLog,
        sessions: &mut SessionStore,
    ) -> ChunkOutcome {
        if !self.is_current(generation) {
            debug!(generation, current = self.generation, "stale chunk dropped");
            return ChunkOutcome::Stale;
        }
        let handle = match &self.state {
            DecoderState::Open { handle, .. } => handle.clone(),
            state => {
                warn!(generation, ?state, "chunk arrived with no open message");
                return ChunkOutcome::Ignored;
            }
        };

        let result = match chunk {
            StreamChunk::Message(text) => log.append_delta(&handle, &text).map(|_| true),
            StreamChunk::ToolCall(call) => log.attach_tool_call(&handle, call).map(|_| true),
            StreamChunk::ToolResult { id, result } => log.resolve_tool_call(&handle, &id, result),
            StreamChunk::SessionInfo(info) => match sessions.active_id().map(str::to_string) {
                Some(active) => Ok(sessions.merge_info(&active, &info).is_some()),
                None => {
                    warn!(generation, "sessionInfo with no active session");
                    Ok(false)
                }
            },
            StreamChunk::Error(message) => {
                self.fail(generation, log, &message);
                return ChunkOutcome::Errored(message);
            }
        };

        match result {
            Ok(true) => ChunkOutcome::Applied,
            Ok(false) => ChunkOutcome::Ignored,
            Err(e) => {
                warn!(generation, error = %e, "chunk rejected by message log");
                ChunkOutcome::Ignored
            }
        }
    }

    /// Clean end of stream: finalizes the open message and returns to `Idle`.
    ///
    /// Returns `true` if a message was finalized.
    pub fn complete(&mut self, generation: u64, log: &mut MessageLog) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match std::mem::replace(&mut self.state, DecoderState::Idle) {
            DecoderState::Open { handle, .. } => {
                if let Err(e) = log.finalize(&handle) {
                    warn!(generation, error = %e, "finalize on completion failed");
                    return false;
                }
                true
            }
            errored @ DecoderState::Errored { .. } => {
                self.state = errored;
                false
            }
            DecoderState::Idle => false,
        }
    }

    /// Transport failure mid-stream: keeps the partial content and records the
    /// reason without adding a visible message.
    pub fn abort(&mut self, generation: u64, log: &mut MessageLog, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        self.abandon(log);
        self.state = DecoderState::Errored {
            generation,
            message: reason.to_string(),
        };
    }

    fn fail(&mut self, generation: u64, log: &mut MessageLog, message: &str) {
        self.abandon(log);
        if let Err(e) = log.append(Message::stream_error(message)) {
            warn!(generation, error = %e, "could not append stream error");
        }
        warn!(generation, error = %message, "server reported stream error");
        self.state = DecoderState::Errored {
            generation,
            message: message.to_string(),
        };
    }

    fn abandon(&mut self, log: &mut MessageLog) {
        if let DecoderState::Open { generation, handle } =
            std::mem::replace(&mut self.state, DecoderState::Idle)
        {
            debug!(generation, message_id = %handle.id(), "open message force-finalized");
            if let Err(e) = log.finalize(&handle) {
                debug!(generation, error = %e, "abandoned message was already closed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_core::MessageStatus;
    use relay_session::CreateSessionOptions;

    fn fixture() -> (StreamDecoder, MessageLog, SessionStore) {
        let mut sessions = SessionStore::new();
        sessions
            .create_session(CreateSessionOptions {
                user_id: "u1".into(),
                session_id: Some("s1".into()),
                ..Default::default()
            })
            .unwrap();
        (StreamDecoder::new(), MessageLog::new(), sessions)
    }

    #[test]
    fn test_open_then_complete() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        let handle = dec.open(g, &mut log).unwrap();
        assert!(dec.is_open());

        for payload in [
            r#"{"type":"Message","content":"Hel"}"#,
            r#"{"type":"Message","content":"lo, "}"#,
            r#"{"type":"Message","content":"world"}"#,
        ] {
            assert_eq!(dec.apply(g, payload, &mut log, &mut sessions), ChunkOutcome::Applied);
        }
        assert!(dec.complete(g, &mut log));
        assert_eq!(dec.state(), &DecoderState::Idle);

        let msg = log.get(handle.id()).unwrap();
        assert_eq!(msg.text(), "Hello, world");
        assert_eq!(msg.status, MessageStatus::Complete);
    }

    #[test]
    fn test_stale_generation_is_inert() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g1 = dec.reserve(&mut log);
        let h1 = dec.open(g1, &mut log).unwrap();
        dec.apply(g1, r#"{"type":"Message","content":"part"}"#, &mut log, &mut sessions);

        let g2 = dec.reserve(&mut log);
        assert_ne!(g1, g2);
        let before = log.snapshot();

        let outcome = dec.apply(g1, r#"{"type":"Message","content":"late"}"#, &mut log, &mut sessions);
        assert_eq!(outcome, ChunkOutcome::Stale);
        assert!(!dec.complete(g1, &mut log));
        assert_eq!(log.snapshot(), before);

        let abandoned = log.get(h1.id()).unwrap();
        assert_eq!(abandoned.text(), "part");
        assert_eq!(abandoned.status, MessageStatus::Complete);
        assert!(dec.open(g1, &mut log).is_err());
    }

    #[test]
    fn test_error_chunk_keeps_partial_content() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        let handle = dec.open(g, &mut log).unwrap();
        dec.apply(g, r#"{"type":"Message","content":"Swapping"}"#, &mut log, &mut sessions);

        let outcome = dec.apply(
            g,
            r#"{"type":"Error","content":"insufficient liquidity"}"#,
            &mut log,
            &mut sessions,
        );
        assert_eq!(outcome, ChunkOutcome::Errored("insufficient liquidity".into()));
        assert!(matches!(dec.state(), DecoderState::Errored { .. }));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, handle.id());
        assert_eq!(snapshot[0].text(), "Swapping");
        assert!(!snapshot[0].is_streaming());
        assert!(snapshot[1].is_error);
        assert_eq!(snapshot[1].text(), "insufficient liquidity");

        // Stream is closed: later chunks do nothing.
        let outcome = dec.apply(g, r#"{"type":"Message","content":"x"}"#, &mut log, &mut sessions);
        assert_eq!(outcome, ChunkOutcome::Ignored);
        assert!(!dec.complete(g, &mut log));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_tool_events() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        let handle = dec.open(g, &mut log).unwrap();

        let call = r#"{"type":"ToolCall","content":{"id":"t1","name":"get_balance","params":{}}}"#;
        let orphan = r#"{"type":"ToolResult","content":{"id":"t9","result":"0"}}"#;
        let result = r#"{"type":"ToolResult","content":{"id":"t1","result":"42"}}"#;
        assert_eq!(dec.apply(g, call, &mut log, &mut sessions), ChunkOutcome::Applied);
        assert_eq!(dec.apply(g, orphan, &mut log, &mut sessions), ChunkOutcome::Ignored);
        assert_eq!(dec.apply(g, result, &mut log, &mut sessions), ChunkOutcome::Applied);

        let tools = &log.get(handle.id()).unwrap().tools;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].result.as_deref(), Some("42"));
    }

    #[test]
    fn test_session_info_merges_into_active() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        dec.open(g, &mut log).unwrap();

        let info = r#"{"type":"sessionInfo","content":{"sessionId":"srv-1","title":"Lend USDC"}}"#;
        assert_eq!(dec.apply(g, info, &mut log, &mut sessions), ChunkOutcome::Applied);
        let active = sessions.active().unwrap();
        assert_eq!(active.session_id, "srv-1");
        assert_eq!(active.title, "Lend USDC");
    }

    #[test]
    fn test_garbage_is_ignored() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        dec.open(g, &mut log).unwrap();
        assert_eq!(dec.apply(g, "<html>", &mut log, &mut sessions), ChunkOutcome::Ignored);
        assert_eq!(
            dec.apply(g, r#"{"type":"Unknown","content":1}"#, &mut log, &mut sessions),
            ChunkOutcome::Ignored
        );
        assert!(dec.is_open());
    }

    #[test]
    fn test_chunk_before_open_is_ignored() {
        let (mut dec, mut log, mut sessions) = fixture();
        let g = dec.reserve(&mut log);
        let outcome = dec.apply(g, r#"{"type":"Message","content":"hi"}"#, &mut log, &mut sessions);
        assert_eq!(outcome, ChunkOutcome::Ignored);
        assert!(log.is_empty());
    }

    #[test]
    fn test_abort_records_reason() {
        let (mut dec, mut log, _) = fixture();
        let g = dec.reserve(&mut log);
        let handle = dec.open(g, &mut log).unwrap();
        dec.abort(g, &mut log, "connection reset");

        assert_eq!(
            dec.state(),
            &DecoderState::Errored {
                generation: g,
                message: "connection reset".into()
            }
        );
        assert!(!log.get(handle.id()).unwrap().is_streaming());
        assert_eq!(log.len(), 1);
    }
}
