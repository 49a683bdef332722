use relay_core::{RelayError, RelayResult};
use relay_session::SessionMetadata;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root of the Relay API, e.g. `https://api.relay.xyz/v1`.
    pub base_url: String,
    /// Owner of sessions created by this client (usually the wallet address).
    #[serde(default)]
    pub user_id: String,
    /// Bearer token from the wallet sign-in exchange.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Timeout for non-streaming requests, and for connecting a stream.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on pages fetched when loading a session.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Chunks buffered between the network task and the orchestrator.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Metadata given to new sessions.
    #[serde(default)]
    pub session: SessionMetadata,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    20
}

fn default_stream_buffer() -> usize {
    256
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            stream_buffer: default_stream_buffer(),
            session: SessionMetadata::default(),
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(raw: &str) -> RelayResult<Self> {
        let config: ClientConfig =
            toml::from_str(raw).map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RelayError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.page_size == 0 || self.max_pages == 0 || self.stream_buffer == 0 {
            return Err(RelayError::Config(
                "page_size, max_pages and stream_buffer must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_session::Chain;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = ClientConfig::from_toml(r#"base_url = "https://api.relay.xyz/""#).unwrap();
        assert_eq!(config.base_url(), "https://api.relay.xyz");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_pages, 20);
        assert_eq!(config.stream_buffer, 256);
        assert!(config.user_id.is_empty());
        assert_eq!(config.session.chain, Chain::Mainnet);
    }

    #[test]
    fn test_session_defaults_section() {
        let raw = r#"
            base_url = "http://localhost:3000"
            user_id = "0xabc"

            [session]
            chain = "testnet"
            model = "gpt-4o"
            temperature = 0.4
        "#;
        let config = ClientConfig::from_toml(raw).unwrap();
        assert_eq!(config.session.chain, Chain::Testnet);
        assert_eq!(config.session.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.session.temperature, Some(0.4));
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = ClientConfig::from_toml(r#"base_url = "ftp://nope""#).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let mut config = ClientConfig::new("http://localhost", "u1");
        config.page_size = 0;
        assert!(config.validate().is_err());
    }
}
