use async_trait::async_trait;
use futures_util::Stream;
use relay_core::{Message, RelayResult};
use relay_session::{Session, SessionMetadata};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Ordered stream of raw chunk payloads for one response.
///
/// Dropping the stream abandons the response; implementations must release
/// the underlying connection when that happens.
pub type ChunkStream = Pin<Box<dyn Stream<Item = RelayResult<String>> + Send>>;

/// Body of a chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    /// Client-generated id of the optimistic user message.
    pub message_id: String,
    pub message: String,
    pub metadata: SessionMetadata,
}

/// Pagination block returned by list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total_items: u64,
    pub items_per_page: u32,
    pub total_pages: u32,
    pub current_page: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// One page of `GET /sessions/:id/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePage {
    #[serde(rename = "sessions", alias = "messages")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// One page of `GET /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Opens streamed assistant responses.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and returns the response body as chunk payloads.
    ///
    /// Resolves once the server has accepted the request, before any chunk
    /// has necessarily arrived.
    async fn open_stream(&self, request: &ChatRequest) -> RelayResult<ChunkStream>;
}

/// Remote session persistence.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Registers a new session. The server may assign its own id.
    async fn create_session(&self, session: &Session) -> RelayResult<Session>;

    /// Fetches one page of a session's messages (pages start at 1).
    async fn fetch_messages(&self, session_id: &str, page: u32, limit: u32)
        -> RelayResult<MessagePage>;

    /// Lists a user's sessions.
    async fn list_sessions(&self, user_id: &str, page: u32, limit: u32) -> RelayResult<SessionPage>;
}
