use serde::{Deserialize, Serialize};

/// A tool invocation requested by the assistant, plus its outcome once known.
///
/// `arguments` and `result` are JSON strings. A call without a result is a
/// valid terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Identifier assigned by the server, used to match the result.
    pub id: String,
    /// Name of the tool (e.g. `get_balance`).
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
    /// JSON-encoded result, set exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCall {
    /// Builds an unresolved call from already-encoded arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            result: None,
        }
    }

    /// Whether a result has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Parses the arguments back into JSON.
    pub fn arguments_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.arguments)
    }
}
