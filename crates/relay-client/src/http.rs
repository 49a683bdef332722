use crate::auth::TokenStore;
use crate::backend::{ChatRequest, ChatTransport, ChunkStream, MessagePage, SessionApi, SessionPage};
use crate::config::ClientConfig;
use crate::stream::{Frame, LineBuffer};
use async_trait::async_trait;
use futures_util::StreamExt;
use relay_core::{RelayError, RelayResult};
use relay_session::Session;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// reqwest-backed implementation of [`ChatTransport`] and [`SessionApi`].
pub struct HttpClient {
    config: ClientConfig,
    http: reqwest::Client,
    tokens: TokenStore,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> RelayResult<Self> {
        let tokens = TokenStore::new(config.auth_token.clone());
        Self::with_tokens(config, tokens)
    }

    /// Builds a client that reads its bearer token from `tokens`.
    pub fn with_tokens(config: ClientConfig, tokens: TokenStore) -> RelayResult<Self> {
        config.validate()?;
        // No overall timeout: it would cut long streams. Non-streaming requests
        // set one per request.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.get() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

pub(crate) fn map_send_error(e: reqwest::Error) -> RelayError {
    RelayError::Network(e.to_string())
}

/// Checks the status and decodes a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> RelayResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(RelayError::Http(format!("Relay API error {status}: {body}")));
    }
    let bytes = resp.bytes().await.map_err(map_send_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RelayError::Decode(format!("unexpected response body: {e}")))
}

#[async_trait]
impl ChatTransport for HttpClient {
    async fn open_stream(&self, request: &ChatRequest) -> RelayResult<ChunkStream> {
        let resp = self
            .authorize(self.http.post(self.url("/chat/stream")))
            .header("accept", "text/event-stream, application/x-ndjson")
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RelayError::Http(format!(
                "Relay API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<RelayResult<String>>(self.config.stream_buffer);
        let mut byte_stream = resp.bytes_stream();
        let session_id = request.session_id.clone();

        tokio::spawn(async move {
            let mut lines = LineBuffer::new();
            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(RelayError::Network(format!("Stream read error: {e}"))))
                            .await;
                        return;
                    }
                };
                let frames = match lines.push(&chunk) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "dropping stream");
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                for frame in frames {
                    match frame {
                        Frame::Payload(payload) => {
                            if tx.send(Ok(payload)).await.is_err() {
                                debug!(session_id = %session_id, "stream receiver dropped; closing connection");
                                return;
                            }
                        }
                        Frame::Done => return,
                    }
                }
            }
            if let Some(Frame::Payload(payload)) = lines.finish() {
                let _ = tx.send(Ok(payload)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl SessionApi for HttpClient {
    async fn create_session(&self, session: &Session) -> RelayResult<Session> {
        let resp = self
            .authorize(self.http.post(self.url("/sessions")))
            .timeout(self.config.timeout())
            .json(session)
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(resp).await
    }

    async fn fetch_messages(
        &self,
        session_id: &str,
        page: u32,
        limit: u32,
    ) -> RelayResult<MessagePage> {
        let resp = self
            .authorize(self.http.get(self.url(&format!("/sessions/{session_id}/messages"))))
            .timeout(self.config.timeout())
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await
            .map_err(map_send_error)?;
        let page: MessagePage = read_json(resp).await?;
        if page.messages.len() > limit as usize {
            warn!(session_id = %session_id, got = page.messages.len(), limit, "server ignored page limit");
        }
        Ok(page)
    }

    async fn list_sessions(&self, user_id: &str, page: u32, limit: u32) -> RelayResult<SessionPage> {
        let resp = self
            .authorize(self.http.get(self.url("/sessions")))
            .timeout(self.config.timeout())
            .query(&[("userId", user_id.to_string())])
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await
            .map_err(map_send_error)?;
        read_json(resp).await
    }
}
