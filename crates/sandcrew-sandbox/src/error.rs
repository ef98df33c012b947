//! Error types for sandbox orchestration.

use thiserror::Error;

/// Main error type for sandbox operations.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Bad or missing launch input.
    #[error("Invalid launch request: {0}")]
    Validation(String),

    /// Sandbox could not be created.
    #[error("Sandbox '{name}' provisioning failed: {reason}")]
    Provision { name: String, reason: String },

    /// Content could not be written into the sandbox.
    #[error("Transfer to {path} in sandbox '{name}' failed: {reason}")]
    Transfer {
        name: String,
        path: String,
        reason: String,
    },

    /// Command inside the sandbox failed.
    #[error("Command in sandbox '{name}' failed: {reason}")]
    Exec { name: String, reason: String },

    /// I/O error talking to the sandbox CLI.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return SandboxError.
pub type Result<T> = std::result::Result<T, SandboxError>;
