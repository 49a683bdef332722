//! Core types and error definitions for the Relay chat client.
//!
//! This crate provides the foundational types shared across all Relay crates,
//! including error handling, message representations, and tool call records.
//!
//! # Main types
//!
//! - [`RelayError`]: Unified error enum for all Relay subsystems.
//! - [`RelayResult`]: Convenience alias for `Result<T, RelayError>`.
//! - [`Role`]: Message role (system, user, assistant, tool).
//! - [`Message`]: A single message within a chat session.
//! - [`SyncState`]: Two-phase delivery state of optimistic messages.
//! - [`ToolCall`]: A tool invocation and its (optional) result.

/// Error taxonomy.
pub mod error;
/// Message types.
pub mod message;
/// Tool call records.
pub mod tool;

pub use error::{RelayError, RelayResult};
pub use message::{Message, MessageContent, MessageStatus, Role, SyncState};
pub use tool::ToolCall;
