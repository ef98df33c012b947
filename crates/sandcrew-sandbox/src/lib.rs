//! Sandbox orchestration for sandcrew.
//!
//! Turns a declarative [`LaunchSpec`] into a deterministic `cs sandbox
//! create` invocation and an ordered list of content transfers into the
//! sandbox's command directory, and applies them through a [`SandboxBackend`].

pub mod backend;
pub mod command;
pub mod env;
pub mod error;
pub mod launch;

// Re-export commonly used types
pub use backend::{CsRunner, SandboxBackend};
pub use command::{build_create_command, create_command_args, shell_quote};
pub use env::EnvVarSet;
pub use error::{Result, SandboxError};
pub use launch::{
    provision, AgentFile, LaunchSpec, Target, Transfer, AGENTS_DIR, DEFAULT_CMD_DIR,
    DEFAULT_TEMPLATE, WORKER_START_COMMAND,
};
