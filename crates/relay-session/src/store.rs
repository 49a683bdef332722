use crate::session::{Session, SessionInfo, SessionMetadata};
use relay_core::{RelayError, RelayResult};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Options for [`SessionStore::create_session`].
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub user_id: String,
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub metadata: Option<SessionMetadata>,
}

impl CreateSessionOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Checks the fields [`SessionStore::create_session`] requires.
    pub fn validate(&self) -> RelayResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(RelayError::Validation("user_id is required".into()));
        }
        if matches!(&self.session_id, Some(id) if id.trim().is_empty()) {
            return Err(RelayError::Validation("session_id must not be blank".into()));
        }
        Ok(())
    }
}

/// In-memory view of the sessions the client knows about.
///
/// Durable storage belongs to the remote API. This store only tracks the
/// authoritative local copy and queues the id of every entry that changed, so
/// the owner can drop caches keyed on it once it has released its own locks.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    active: Option<String>,
    invalidated: Vec<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session and makes it the active one.
    pub fn create_session(&mut self, options: CreateSessionOptions) -> RelayResult<Session> {
        options.validate()?;
        let user_id = options.user_id.trim();

        let mut session = match options.session_id {
            Some(id) => Session::with_id(id, user_id),
            None => Session::new(user_id),
        };
        if self.sessions.contains_key(&session.session_id) {
            return Err(RelayError::Session(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        if let Some(title) = options.title {
            session.title = title;
        }
        if let Some(metadata) = options.metadata {
            session.metadata = metadata;
        }

        debug!(session_id = %session.session_id, user_id = %session.user_id, "Session created");
        self.active = Some(session.session_id.clone());
        self.insert(session.clone());
        Ok(session)
    }

    /// Adds or replaces a session (e.g. one returned by the server).
    pub fn insert(&mut self, session: Session) {
        let id = session.session_id.clone();
        self.sessions.insert(id.clone(), session);
        self.invalidate(&id);
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.sessions.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Switches the active session. Returns `false` if the id is unknown.
    pub fn set_active(&mut self, session_id: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            self.active = Some(session_id.to_string());
            true
        } else {
            false
        }
    }

    /// Bumps `last_active_at` and `message_count`. Unknown ids are ignored.
    pub fn touch(&mut self, session_id: &str) {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.touch();
                self.invalidate(session_id);
            }
            None => warn!(session_id = %session_id, "touch on unknown session ignored"),
        }
    }

    /// Applies server-sent session details. If the server assigned a new id the
    /// entry is re-keyed, and the id now in effect is returned.
    pub fn merge_info(&mut self, session_id: &str, info: &SessionInfo) -> Option<String> {
        let Some(mut session) = self.sessions.remove(session_id) else {
            warn!(session_id = %session_id, "sessionInfo for unknown session ignored");
            return None;
        };

        if let Some(title) = &info.title {
            session.title = title.clone();
        }
        if let Some(patch) = &info.metadata {
            session.metadata.merge(patch);
        }
        session.updated_at = chrono::Utc::now();

        let new_id = match &info.session_id {
            Some(id) if !id.is_empty() && id != session_id => {
                debug!(old = %session_id, new = %id, "Session re-keyed by server");
                session.session_id = id.clone();
                if self.active.as_deref() == Some(session_id) {
                    self.active = Some(id.clone());
                }
                self.invalidate(session_id);
                id.clone()
            }
            _ => session_id.to_string(),
        };

        self.sessions.insert(new_id.clone(), session);
        self.invalidate(&new_id);
        Some(new_id)
    }

    /// Drains the ids of sessions changed since the last call, oldest first.
    pub fn take_invalidated(&mut self) -> Vec<String> {
        std::mem::take(&mut self.invalidated)
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn invalidate(&mut self, session_id: &str) {
        if !self.invalidated.iter().any(|id| id == session_id) {
            self.invalidated.push(session_id.to_string());
        }
    }
}
