use thiserror::Error;

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level error type for the Relay chat client.
///
/// Only [`RelayError::Validation`] and the transport variants are meant to reach
/// a caller. The log and decoder variants are absorbed and logged where they
/// occur.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad input to the session store (e.g. a missing user id).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A message with the same id is already present in the log.
    #[error("Duplicate message: {0}")]
    DuplicateMessage(String),

    /// A chunk or mutation targeted a finalized or unknown message.
    #[error("Protocol anomaly: {0}")]
    ProtocolAnomaly(String),

    /// The server reported an error inside the response stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Transport-level failure (connection refused, reset, timeout).
    #[error("Network failure: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A payload could not be decoded into a typed value.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Session lookup or lifecycle error.
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration parsing or validation error.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether this error came from the transport rather than from local state.
    pub fn is_network(&self) -> bool {
        matches!(self, RelayError::Network(_) | RelayError::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::Validation("user_id is required".into());
        assert_eq!(err.to_string(), "Validation error: user_id is required");
    }

    #[test]
    fn test_is_network() {
        assert!(RelayError::Network("reset".into()).is_network());
        assert!(RelayError::Http("500".into()).is_network());
        assert!(!RelayError::Stream("boom".into()).is_network());
    }
}
