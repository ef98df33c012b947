//! Worker error type.

use sandcrew_claude_sdk::SdkError;
use sandcrew_core::CoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from a worker pass.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] CoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] SdkError),

    /// A best-effort setup step failed.
    #[error("Setup step '{step}' failed: {reason}")]
    Setup { step: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
