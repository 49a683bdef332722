//! Client side of the wallet sign-in exchange.
//!
//! The server issues a nonce, the wallet signs the accompanying message
//! outside this crate, and the signature is traded for a bearer token. No
//! signature is produced or verified here.

use crate::config::ClientConfig;
use crate::http::{map_send_error, read_json};
use parking_lot::RwLock;
use relay_core::RelayResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared slot holding the current bearer token.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonceResponse {
    pub nonce: String,
    /// Full text the wallet is asked to sign.
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub address: String,
    pub public_key: String,
    pub signature: String,
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    access_token: String,
}

/// Talks to `/auth/nonce` and `/auth/verify`.
pub struct AuthClient {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: TokenStore,
}

impl AuthClient {
    pub fn new(config: ClientConfig, tokens: TokenStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    pub async fn request_nonce(&self, address: &str) -> RelayResult<NonceResponse> {
        let url = format!("{}/auth/nonce", self.config.base_url());
        let resp = self
            .http
            .post(&url)
            .timeout(self.config.timeout())
            .json(&serde_json::json!({ "address": address }))
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(resp).await
    }

    /// Exchanges a wallet signature for a token and stores it.
    pub async fn verify(&self, request: &VerifyRequest) -> RelayResult<String> {
        let url = format!("{}/auth/verify", self.config.base_url());
        let resp = self
            .http
            .post(&url)
            .timeout(self.config.timeout())
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;
        let body: VerifyResponse = read_json(resp).await?;
        self.tokens.set(body.access_token.clone());
        info!(address = %request.address, "Wallet sign-in verified");
        Ok(body.access_token)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_store_is_shared() {
        let tokens = TokenStore::default();
        let other = tokens.clone();
        tokens.set("abc");
        assert_eq!(other.get().as_deref(), Some("abc"));
        other.clear();
        assert!(tokens.get().is_none());
    }
}
