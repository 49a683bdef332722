use crate::backend::{ChatRequest, ChatTransport, ChunkStream, SessionApi};
use crate::config::ClientConfig;
use crate::decoder::{ChunkOutcome, DecoderState, StreamDecoder};
use crate::http::HttpClient;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use relay_core::{Message, MessageStatus, RelayError, RelayResult, Role, SyncState};
use relay_session::{
    CreateSessionOptions, MessageLog, Session, SessionInfo, SessionMetadata, SessionStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

/// Callback run with a session id after that session changed locally.
pub type InvalidationHook = Arc<dyn Fn(&str) + Send + Sync>;

/// What a UI renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    /// The active session, if any.
    pub session: Option<Session>,
    /// Ordered copy of the message log.
    pub messages: Vec<Message>,
    /// A request is out and the response has not started yet.
    pub is_sending: bool,
    /// The assistant response is streaming.
    pub is_typing: bool,
    /// Last failure worth showing, cleared by the next send.
    pub last_error: Option<String>,
}

/// Settings the orchestrator needs besides its backends.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Owner of sessions created on first send.
    pub user_id: String,
    /// Metadata for new sessions.
    pub metadata: SessionMetadata,
    pub page_size: u32,
    pub max_pages: u32,
}

impl From<&ClientConfig> for OrchestratorOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            metadata: config.session.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }
}

/// A locally created session waiting to be registered with the server.
///
/// Every send to the session shares one of these, so the server sees a single
/// `POST /sessions` no matter how many messages are queued behind it.
struct Registration {
    session: Session,
    remote_id: OnceCell<String>,
}

struct ChatState {
    sessions: SessionStore,
    log: MessageLog,
    decoder: StreamDecoder,
    /// Keyed by local session id.
    unsynced_sessions: HashMap<String, Arc<Registration>>,
    is_sending: bool,
    is_typing: bool,
    last_error: Option<String>,
}

/// An exchange ready to go out on the network.
struct Outgoing {
    generation: u64,
    message_id: String,
    request: ChatRequest,
    register: Option<Arc<Registration>>,
}

/// Coordinates the session store, message log and stream decoder.
///
/// All state lives behind one lock that is never held across an `.await`, so
/// the log only changes between suspension points. Sending a new message or
/// switching sessions bumps the stream generation; an older `send_message`
/// future notices at its next chunk and stops without touching the log.
///
/// Invalidation hooks run after the lock is released and may call back into
/// the orchestrator.
pub struct ChatOrchestrator {
    transport: Arc<dyn ChatTransport>,
    api: Arc<dyn SessionApi>,
    options: OrchestratorOptions,
    state: Mutex<ChatState>,
    hooks: RwLock<Vec<InvalidationHook>>,
    updates: watch::Sender<ChatSnapshot>,
}

impl ChatOrchestrator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        api: Arc<dyn SessionApi>,
        options: OrchestratorOptions,
    ) -> Self {
        let (updates, _) = watch::channel(ChatSnapshot::default());
        Self {
            transport,
            api,
            options,
            state: Mutex::new(ChatState {
                sessions: SessionStore::new(),
                log: MessageLog::new(),
                decoder: StreamDecoder::new(),
                unsynced_sessions: HashMap::new(),
                is_sending: false,
                is_typing: false,
                last_error: None,
            }),
            hooks: RwLock::new(Vec::new()),
            updates,
        }
    }

    /// Wires an [`HttpClient`] in as both transport and persistence API.
    pub fn from_config(config: &ClientConfig) -> RelayResult<Self> {
        let client = Arc::new(HttpClient::new(config.clone())?);
        Ok(Self::new(client.clone(), client, config.into()))
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.state.lock();
        Self::build_snapshot(&state)
    }

    /// Receives a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.updates.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().log.snapshot()
    }

    pub fn active_session(&self) -> Option<Session> {
        self.state.lock().sessions.active().cloned()
    }

    /// Registers a hook run whenever a session changes locally.
    pub fn on_session_invalidated(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Sends a user message and streams the reply into the log.
    ///
    /// The message is appended before any network call. Failures end up in the
    /// log (a `failed` user message or a visible error message) and in
    /// [`ChatSnapshot::last_error`]; nothing is returned to the caller.
    pub async fn send_message(&self, text: &str, session_id: Option<&str>) {
        let text = text.trim();
        if text.is_empty() {
            debug!("empty message not sent");
            return;
        }
        let outgoing = self.update(|state| self.prepare_send(state, text, session_id));
        if let Some(outgoing) = outgoing {
            self.run_exchange(outgoing).await;
        }
    }

    /// Resends a user message whose delivery failed.
    ///
    /// Returns `false` if there is no such failed message in the log.
    pub async fn retry(&self, message_id: &str) -> bool {
        let outgoing = self.update(|state: &mut ChatState| -> Option<Outgoing> {
            let message = state.log.get(message_id)?;
            if message.role != Role::User || message.sync != SyncState::Failed {
                return None;
            }
            let text = message.text();
            let session_id = state.sessions.active_id()?.to_string();
            if let Err(e) = state.log.set_sync(message_id, SyncState::Pending) {
                warn!(message_id = %message_id, error = %e, "retry rejected");
                return None;
            }
            let generation = state.decoder.reserve(&mut state.log);
            state.is_sending = true;
            state.is_typing = false;
            state.last_error = None;
            Some(self.outgoing(state, generation, &session_id, message_id, text))
        });
        let Some(outgoing) = outgoing else {
            return false;
        };
        info!(message_id = %message_id, "Retrying message");
        self.run_exchange(outgoing).await;
        true
    }

    /// Abandons the active stream, keeping what it produced so far.
    pub fn cancel(&self) {
        self.update(|state| {
            let generation = state.decoder.reserve(&mut state.log);
            debug!(generation, "Stream cancelled");
            state.is_sending = false;
            state.is_typing = false;
        });
    }

    /// Switches to `session_id`, replacing the log with the server's history.
    ///
    /// Any in-flight stream is abandoned right away, before the fetch. On
    /// failure the current log is left as it is.
    pub async fn load_session(&self, session_id: &str) -> RelayResult<Vec<Message>> {
        let generation = self.update(|state: &mut ChatState| -> RelayResult<u64> {
            if state.sessions.get(session_id).is_none() {
                self.session_options(session_id).validate()?;
            }
            let generation = state.decoder.reserve(&mut state.log);
            state.is_sending = false;
            state.is_typing = false;
            Ok(generation)
        })?;

        let mut messages = self.fetch_history(session_id).await?;
        for message in &mut messages {
            message.status = MessageStatus::Complete;
        }

        self.update(|state: &mut ChatState| -> RelayResult<()> {
            if !state.decoder.is_current(generation) {
                debug!(session_id = %session_id, "session load superseded");
                return Ok(());
            }
            let created = if state.sessions.get(session_id).is_some() {
                None
            } else {
                Some(state.sessions.create_session(self.session_options(session_id))?)
            };
            state.log.replace(messages.clone());
            if let Some(mut session) = created {
                session.message_count = state.log.len() as u64;
                state.sessions.insert(session);
            }
            state.sessions.set_active(session_id);
            state.last_error = None;
            info!(session_id = %session_id, messages = state.log.len(), "Session loaded");
            Ok(())
        })?;
        Ok(messages)
    }

    /// Lists the configured user's sessions (first page).
    pub async fn list_sessions(&self) -> RelayResult<Vec<Session>> {
        let page = self
            .api
            .list_sessions(&self.options.user_id, 1, self.options.page_size)
            .await?;
        Ok(page.sessions)
    }

    async fn fetch_history(&self, session_id: &str) -> RelayResult<Vec<Message>> {
        let mut messages = Vec::new();
        for page in 1..=self.options.max_pages {
            let batch = self
                .api
                .fetch_messages(session_id, page, self.options.page_size)
                .await?;
            messages.extend(batch.messages);
            if !batch.pagination.has_next_page {
                return Ok(messages);
            }
        }
        warn!(
            session_id = %session_id,
            max_pages = self.options.max_pages,
            "history truncated at page limit"
        );
        Ok(messages)
    }

    fn session_options(&self, session_id: &str) -> CreateSessionOptions {
        CreateSessionOptions {
            user_id: self.options.user_id.clone(),
            session_id: Some(session_id.to_string()),
            title: None,
            metadata: Some(self.options.metadata.clone()),
        }
    }

    fn prepare_send(
        &self,
        state: &mut ChatState,
        text: &str,
        session_id: Option<&str>,
    ) -> Option<Outgoing> {
        let session_id = match self.resolve_session(state, session_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "cannot start session");
                state.last_error = Some(e.to_string());
                return None;
            }
        };

        let generation = state.decoder.reserve(&mut state.log);
        let message = Message::optimistic_user(text);
        let message_id = message.id.clone();
        if let Err(e) = state.log.append(message) {
            warn!(error = %e, "optimistic append failed");
            return None;
        }
        state.sessions.touch(&session_id);
        state.is_sending = true;
        state.is_typing = false;
        state.last_error = None;
        debug!(session_id = %session_id, generation, message_id = %message_id, "Message queued");

        Some(self.outgoing(state, generation, &session_id, &message_id, text.to_string()))
    }

    fn outgoing(
        &self,
        state: &ChatState,
        generation: u64,
        session_id: &str,
        message_id: &str,
        text: String,
    ) -> Outgoing {
        Outgoing {
            generation,
            message_id: message_id.to_string(),
            request: ChatRequest {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                message: text,
                metadata: state
                    .sessions
                    .get(session_id)
                    .map(|s| s.metadata.clone())
                    .unwrap_or_else(|| self.options.metadata.clone()),
            },
            register: state.unsynced_sessions.get(session_id).cloned(),
        }
    }

    /// Picks the session a message goes to, creating one if needed.
    fn resolve_session(
        &self,
        state: &mut ChatState,
        requested: Option<&str>,
    ) -> RelayResult<String> {
        match requested {
            Some(id) if state.sessions.active_id() == Some(id) => Ok(id.to_string()),
            Some(id) => {
                if !state.sessions.set_active(id) {
                    state.sessions.create_session(self.session_options(id))?;
                }
                // A different conversation: its history is not in the log.
                let generation = state.decoder.reserve(&mut state.log);
                debug!(session_id = %id, generation, "switching session without history");
                state.log.clear();
                Ok(id.to_string())
            }
            None => match state.sessions.active_id() {
                Some(id) => Ok(id.to_string()),
                None => {
                    let session = state.sessions.create_session(CreateSessionOptions {
                        user_id: self.options.user_id.clone(),
                        metadata: Some(self.options.metadata.clone()),
                        ..Default::default()
                    })?;
                    info!(session_id = %session.session_id, "New chat session");
                    state.unsynced_sessions.insert(
                        session.session_id.clone(),
                        Arc::new(Registration {
                            session: session.clone(),
                            remote_id: OnceCell::new(),
                        }),
                    );
                    Ok(session.session_id)
                }
            },
        }
    }

    async fn run_exchange(&self, mut outgoing: Outgoing) {
        let generation = outgoing.generation;

        if let Some(registration) = outgoing.register.take() {
            match self.register(&registration).await {
                Ok(remote_id) => outgoing.request.session_id = remote_id,
                Err(e) => {
                    self.fail_send(generation, &outgoing.message_id, e);
                    return;
                }
            }
        }

        let stream = match self.transport.open_stream(&outgoing.request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_send(generation, &outgoing.message_id, e);
                return;
            }
        };

        let opened = self.update(|state| {
            // The server has the message even if this exchange was superseded.
            if let Err(e) = state.log.set_sync(&outgoing.message_id, SyncState::Confirmed) {
                debug!(error = %e, "message already reconciled");
            }
            if !state.decoder.is_current(generation) {
                debug!(generation, "exchange superseded before streaming");
                return false;
            }
            state.is_sending = false;
            state.is_typing = true;
            match state.decoder.open(generation, &mut state.log) {
                Ok(_) => {
                    Self::touch_active(state);
                    true
                }
                Err(e) => {
                    warn!(generation, error = %e, "cannot open assistant message");
                    state.is_typing = false;
                    false
                }
            }
        });
        if opened {
            self.consume(generation, stream).await;
        }
    }

    /// Registers a local session with the server and returns the id the
    /// server knows it by. Concurrent sends to the same session wait on the
    /// first registration; a failed one is attempted again by the next send.
    async fn register(&self, registration: &Registration) -> RelayResult<String> {
        let remote_id = registration
            .remote_id
            .get_or_try_init(|| async {
                let remote = self.api.create_session(&registration.session).await?;
                Ok::<_, RelayError>(remote.session_id)
            })
            .await?
            .clone();

        let local_id = registration.session.session_id.as_str();
        self.update(|state| {
            if state.unsynced_sessions.remove(local_id).is_some() && remote_id != local_id {
                let info = SessionInfo {
                    session_id: Some(remote_id.clone()),
                    ..SessionInfo::default()
                };
                state.sessions.merge_info(local_id, &info);
            }
        });
        Ok(remote_id)
    }

    async fn consume(&self, generation: u64, mut stream: ChunkStream) {
        while let Some(item) = stream.next().await {
            let streaming = self.update(|state| {
                if !state.decoder.is_current(generation) {
                    debug!(generation, "abandoning stale stream");
                    return false;
                }
                match item {
                    Ok(payload) => {
                        let outcome = state.decoder.apply(
                            generation,
                            &payload,
                            &mut state.log,
                            &mut state.sessions,
                        );
                        match outcome {
                            ChunkOutcome::Errored(message) => {
                                // The error notice is a message of its own.
                                Self::touch_active(state);
                                state.is_typing = false;
                                state.last_error = Some(message);
                                false
                            }
                            _ => true,
                        }
                    }
                    Err(e) => {
                        warn!(generation, error = %e, "stream interrupted");
                        state.decoder.abort(generation, &mut state.log, &e.to_string());
                        state.is_typing = false;
                        state.last_error = Some(e.to_string());
                        false
                    }
                }
            });
            if !streaming {
                return;
            }
        }

        self.update(|state| {
            if !state.decoder.is_current(generation) {
                return;
            }
            state.decoder.complete(generation, &mut state.log);
            state.is_typing = false;
            debug!(generation, "Stream completed");
        });
    }

    fn fail_send(&self, generation: u64, message_id: &str, err: RelayError) {
        warn!(generation, message_id = %message_id, error = %err, "message not delivered");
        self.update(|state| {
            if let Err(e) = state.log.set_sync(message_id, SyncState::Failed) {
                debug!(error = %e, "could not mark message failed");
            }
            if state.decoder.is_current(generation) {
                state.is_sending = false;
                state.is_typing = false;
                state.last_error = Some(err.to_string());
            }
        });
    }

    /// Counts one more message in the active session.
    fn touch_active(state: &mut ChatState) {
        if let Some(id) = state.sessions.active_id().map(str::to_string) {
            state.sessions.touch(&id);
        }
    }

    /// Runs `f` under the state lock and publishes the result. Hooks for the
    /// sessions it changed run once the lock is released.
    fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let (result, invalidated) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let result = f(state);
            self.publish(state);
            (result, state.sessions.take_invalidated())
        };
        self.notify(&invalidated);
        result
    }

    fn notify(&self, session_ids: &[String]) {
        if session_ids.is_empty() {
            return;
        }
        let hooks: Vec<InvalidationHook> = self.hooks.read().clone();
        for id in session_ids {
            for hook in &hooks {
                hook(id);
            }
        }
    }

    fn publish(&self, state: &ChatState) {
        self.updates.send_replace(Self::build_snapshot(state));
    }

    fn build_snapshot(state: &ChatState) -> ChatSnapshot {
        let last_error = match state.decoder.state() {
            DecoderState::Errored { message, .. } if state.last_error.is_none() => {
                Some(message.clone())
            }
            _ => state.last_error.clone(),
        };
        ChatSnapshot {
            session: state.sessions.active().cloned(),
            messages: state.log.snapshot(),
            is_sending: state.is_sending,
            is_typing: state.is_typing,
            last_error,
        }
    }
}
