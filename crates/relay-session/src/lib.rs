//! Session store and message log for the Relay chat client.

pub mod log;
pub mod session;
pub mod store;

pub use log::{MessageLog, StreamHandle};
pub use session::{Chain, MetadataPatch, Session, SessionInfo, SessionMetadata};
pub use store::{CreateSessionOptions, SessionStore};
