//! Error types for the Claude Code SDK.

use thiserror::Error;

/// Errors that can occur during Claude Code SDK operations.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Bad or missing input, detected before any process is spawned.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Failed to spawn the Claude process.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the process output failed part way through.
    #[error("Failed reading Claude output: {0}")]
    StreamRead(#[source] std::io::Error),

    /// Claude process exited unsuccessfully. `-1` when killed by a signal.
    #[error("Claude process exited with code {code}")]
    ProcessExit { code: i32 },

    /// Handler could not write to its output.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error.
    #[error("Channel closed")]
    ChannelClosed,
}
