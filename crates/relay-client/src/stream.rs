use relay_core::{RelayError, ToolCall};
use relay_session::SessionInfo;
use serde::Deserialize;

/// A decoded chunk of an assistant response.
///
/// The server sends one JSON object per chunk:
/// `{ "type": "Message" | "ToolCall" | "ToolResult" | "sessionInfo" | "Error", "content": ... }`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A text delta for the open assistant message.
    Message(String),
    /// The assistant invoked a tool. Arguments are already JSON-encoded.
    ToolCall(ToolCall),
    /// Outcome of an earlier tool call.
    ToolResult {
        /// Id of the matching [`StreamChunk::ToolCall`].
        id: String,
        /// JSON-encoded result (string results are kept verbatim).
        result: String,
    },
    /// Session details pushed by the server.
    SessionInfo(SessionInfo),
    /// The server gave up on this response.
    Error(String),
}

/// A payload that could not be turned into a [`StreamChunk`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot decode {} chunk: {reason}", .kind.as_deref().unwrap_or("untyped"))]
pub struct DecodeError {
    /// The `type` tag, when the payload had one.
    pub kind: Option<String>,
    /// What went wrong.
    pub reason: String,
}

impl From<DecodeError> for RelayError {
    fn from(err: DecodeError) -> Self {
        RelayError::Decode(err.to_string())
    }
}

// -- Wire types --

#[derive(Deserialize)]
#[serde(tag = "type", content = "content")]
enum WireChunk {
    Message(String),
    ToolCall(WireToolCall),
    ToolResult(WireToolResult),
    #[serde(rename = "sessionInfo")]
    SessionInfo(SessionInfo),
    Error(serde_json::Value),
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    name: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct WireToolResult {
    id: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Decodes one payload into a typed chunk.
pub fn decode_chunk(payload: &str) -> Result<StreamChunk, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| DecodeError {
        kind: None,
        reason: format!("invalid JSON: {e}"),
    })?;
    let kind = value.get("type").and_then(|t| t.as_str()).map(str::to_string);

    let wire: WireChunk = serde_json::from_value(value).map_err(|e| DecodeError {
        kind: kind.clone(),
        reason: e.to_string(),
    })?;

    Ok(match wire {
        WireChunk::Message(text) => StreamChunk::Message(text),
        WireChunk::ToolCall(call) => {
            let arguments = match call.params {
                serde_json::Value::Null => "{}".to_string(),
                params => params.to_string(),
            };
            StreamChunk::ToolCall(ToolCall::new(call.id, call.name, arguments))
        }
        WireChunk::ToolResult(res) => StreamChunk::ToolResult {
            id: res.id,
            result: match res.result {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
        },
        WireChunk::SessionInfo(info) => StreamChunk::SessionInfo(info),
        WireChunk::Error(content) => StreamChunk::Error(error_text(content)),
    })
}

fn error_text(content: serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(ref map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        serde_json::Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

/// One framed unit of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON payload to hand to [`decode_chunk`].
    Payload(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Longest line [`LineBuffer`] will hold before giving up on the body.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into newline-delimited frames.
///
/// Accepts both bare JSON lines and SSE framing (`data: {...}`). Blank lines,
/// SSE comments (`:`) and `event:`/`id:`/`retry:` fields are skipped. Bytes
/// are buffered until a full line arrives, so multi-byte characters split
/// across network reads survive. A line longer than the limit is an error
/// and the buffered bytes are dropped.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that rejects lines longer than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Feeds raw bytes and returns every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, DecodeError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if line.len() > self.limit + 1 {
                return Err(self.overflow());
            }
            if let Some(frame) = parse_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        if self.buf.len() > self.limit {
            return Err(self.overflow());
        }
        Ok(frames)
    }

    fn overflow(&mut self) -> DecodeError {
        self.buf = Vec::new();
        DecodeError {
            kind: None,
            reason: format!("line exceeds {} bytes", self.limit),
        }
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if ["event:", "id:", "retry:"].iter().any(|p| line.starts_with(p)) {
        return None;
    }
    let data = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Frame::Done);
    }
    Some(Frame::Payload(data.to_string()))
}
