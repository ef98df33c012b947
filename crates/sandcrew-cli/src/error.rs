//! CLI error type and exit codes.

use sandcrew_core::CoreError;
use sandcrew_sandbox::SandboxError;
use thiserror::Error;

/// Exit code for invalid input.
pub const EXIT_VALIDATION: u8 = 2;

/// Exit code for everything else.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum CliError {
    /// Bad flags or inputs, detected before side effects.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Sandbox(SandboxError),

    #[error(transparent)]
    State(#[from] CoreError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Validation(_) => EXIT_VALIDATION,
            CliError::State(
                CoreError::DuplicateId(_)
                | CoreError::TaskInProgress(_)
                | CoreError::TaskNotFound(_)
                | CoreError::InvalidStateTransition { .. },
            ) => EXIT_VALIDATION,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<SandboxError> for CliError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Validation(msg) => CliError::Validation(msg),
            other => CliError::Sandbox(other),
        }
    }
}
