//! Line protocol for Claude Code `stream-json` output.
//!
//! Each stdout line is either one JSON value or opaque text. JSON values are
//! decoded into [`ClaudeMessage`] and handed to a [`StreamHandler`] together
//! with the raw value.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SdkError;
use crate::types::ClaudeMessage;

/// Handler trait for streamed output.
///
/// Implement this to display or collect what the agent prints. Handler errors
/// are logged by the executor and never stop the drain.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Called for every line that parsed as JSON.
    async fn on_message(&self, message: &ClaudeMessage, raw: &Value) -> Result<(), SdkError>;

    /// Called for every line that is not JSON.
    async fn on_text(&self, line: &str) -> Result<(), SdkError>;
}

/// One decoded stdout line.
#[derive(Debug, Clone)]
pub enum StreamLine {
    /// A JSON value.
    Message { message: ClaudeMessage, raw: Value },
    /// Anything that failed to parse, verbatim.
    Text(String),
}

impl StreamLine {
    /// Decode a single line (without its trailing newline).
    pub fn parse(line: &str) -> Self {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(raw) => {
                let message = serde_json::from_value::<ClaudeMessage>(raw.clone())
                    .unwrap_or_else(|_| ClaudeMessage::Unknown(raw.clone()));
                StreamLine::Message { message, raw }
            }
            Err(_) => StreamLine::Text(line.to_string()),
        }
    }

    /// Session id announced by this line, if it is a `system` message.
    ///
    /// Read from the raw object so that a `system` line whose other fields
    /// fail typed decoding still yields its session.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StreamLine::Message { raw, .. } => system_session_id(raw),
            StreamLine::Text(_) => None,
        }
    }
}

/// Non-empty string `session_id` of an object whose `type` is `system`.
fn system_session_id(raw: &Value) -> Option<&str> {
    if raw.get("type").and_then(Value::as_str) != Some("system") {
        return None;
    }
    raw.get("session_id")
        .and_then(Value::as_str)
        .filter(|sid| !sid.is_empty())
}
