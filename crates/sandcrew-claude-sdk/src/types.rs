//! Type definitions for Claude Code `stream-json` messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SdkError;

/// Top-level message from Claude Code CLI stdout.
///
/// Only `system` messages matter to the executor (they carry the session
/// id); everything else is passed through for display.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeMessage {
    /// System initialization message.
    System {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    },

    /// Assistant response message.
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Execution result.
    Result {
        #[serde(default, alias = "isError")]
        is_error: Option<bool>,
        #[serde(default, alias = "durationMs")]
        duration_ms: Option<u64>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
    },

    /// Any other shape, kept verbatim.
    #[serde(untagged)]
    Unknown(Value),
}

impl ClaudeMessage {
    /// Short name of the message kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Assistant { .. } => "assistant",
            Self::Result { .. } => "result",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Assistant message content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Content item in an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Text content.
    Text { text: String },

    /// Thinking/reasoning content.
    Thinking { thinking: String },

    /// Tool use request.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },

    /// Anything else.
    #[serde(other)]
    Other,
}

/// Permission mode for Claude Code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Default mode - asks for permission.
    #[default]
    Default,
    /// Accept file edits automatically.
    AcceptEdits,
    /// Plan mode - requires approval to exit.
    Plan,
    /// Bypass all permissions (dangerous).
    BypassPermissions,
}

impl PermissionMode {
    /// Value passed to `--permission-mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(SdkError::Validation(format!(
                "unknown permission mode: {other}"
            ))),
        }
    }
}
