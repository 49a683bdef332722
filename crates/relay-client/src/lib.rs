//! Streaming chat client for the Relay agent API.
//!
//! [`ChatOrchestrator`] is the entry point: it sends user messages, folds the
//! streamed assistant response into a [`relay_session::MessageLog`] through a
//! [`StreamDecoder`], and publishes [`ChatSnapshot`]s for a UI to render.
//! Network access goes through the [`ChatTransport`] and [`SessionApi`]
//! traits; [`HttpClient`] implements both over reqwest.

pub mod auth;
pub mod backend;
pub mod config;
pub mod decoder;
pub mod http;
pub mod orchestrator;
pub mod stream;

pub use auth::{AuthClient, TokenStore};
pub use backend::{ChatRequest, ChatTransport, ChunkStream, MessagePage, Pagination, SessionApi, SessionPage};
pub use config::ClientConfig;
pub use decoder::{ChunkOutcome, DecoderState, StreamDecoder};
pub use http::HttpClient;
pub use orchestrator::{ChatOrchestrator, ChatSnapshot, InvalidationHook, OrchestratorOptions};
pub use stream::{decode_chunk, DecodeError, Frame, LineBuffer, StreamChunk};
