//! sandcrew core domain types.
//!
//! This crate owns the task lifecycle state machine:
//! - `Task`, `TaskId` and `TaskStatus`
//! - the durable `State` document and its `TaskStateManager`
//! - the single-slot `SessionRecord` artifact
//!
//! Nothing here knows about subprocesses or sandboxes.

pub mod error;
mod fs;
pub mod ids;
pub mod session;
pub mod state;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::TaskId;
pub use session::SessionRecord;
pub use state::{State, TaskStateManager};
pub use status::TaskStatus;
pub use task::Task;
