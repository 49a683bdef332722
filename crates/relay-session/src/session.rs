use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default title given to sessions created without one.
pub const DEFAULT_TITLE: &str = "New chat";

/// Network the wallet is connected to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SessionMetadata {
    /// Overwrites every field the patch carries.
    pub fn merge(&mut self, patch: &MetadataPatch) {
        if let Some(chain) = patch.chain {
            self.chain = chain;
        }
        if let Some(wallet) = &patch.wallet_address {
            self.wallet_address = Some(wallet.clone());
        }
        if let Some(model) = &patch.model {
            self.model = Some(model.clone());
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = Some(temperature);
        }
    }
}

/// Partial metadata, as carried by a `sessionInfo` stream chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default)]
    pub chain: Option<Chain>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Session details pushed by the server mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<MetadataPatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id)
    }

    pub fn with_id(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_string(),
            metadata: SessionMetadata::default(),
            created_at: now,
            updated_at: now,
            last_active_at: now,
            message_count: 0,
        }
    }

    /// Records one exchanged message.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_active_at = now;
        self.updated_at = now;
        self.message_count += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_increments_count() {
        let mut session = Session::new("user-1");
        let before = session.last_active_at;
        session.touch();
        session.touch();
        assert_eq!(session.message_count, 2);
        assert!(session.last_active_at >= before);
    }

    #[test]
    fn test_metadata_merge_keeps_unset_fields() {
        let mut meta = SessionMetadata {
            chain: Chain::Mainnet,
            wallet_address: Some("0xabc".into()),
            model: Some("gpt-4o".into()),
            temperature: None,
        };
        meta.merge(&MetadataPatch {
            chain: Some(Chain::Testnet),
            temperature: Some(0.2),
            ..MetadataPatch::default()
        });
        assert_eq!(meta.chain, Chain::Testnet);
        assert_eq!(meta.wallet_address.as_deref(), Some("0xabc"));
        assert_eq!(meta.model.as_deref(), Some("gpt-4o"));
        assert_eq!(meta.temperature, Some(0.2));
    }

    #[test]
    fn test_session_info_parses_partial() {
        let info: SessionInfo =
            serde_json::from_str(r#"{"title":"Swap APT","metadata":{"chain":"testnet"}}"#).unwrap();
        assert!(info.session_id.is_none());
        assert_eq!(info.title.as_deref(), Some("Swap APT"));
        assert_eq!(info.metadata.unwrap().chain, Some(Chain::Testnet));
    }
}
