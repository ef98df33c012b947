//! Core domain errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::TaskStatus;

/// Core domain errors for sandcrew.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task with this id already exists in the queue, current slot or history.
    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    /// A task is already running; only one current task is allowed.
    #[error("Task already in progress: {0}")]
    TaskInProgress(String),

    /// Task not found in the queue or current slot.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// Persisted document could not be parsed.
    #[error("Corrupt state document at {}: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error while reading or writing a document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
