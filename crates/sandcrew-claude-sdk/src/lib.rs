//! Claude Code SDK for sandcrew
//!
//! This crate runs the Claude Code CLI as a one-shot subprocess with
//! `stream-json` output, drains its stdout line by line while the process
//! runs, and reports the last session id the agent announced.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use sandcrew_claude_sdk::{ClaudeExecutor, EchoHandler, PermissionMode};
//!
//! async fn run_agent() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = ClaudeExecutor::new("claude")
//!         .with_home_dir("/home/owner")
//!         .with_permission_mode(PermissionMode::AcceptEdits);
//!
//!     let outcome = executor
//!         .execute(Path::new("."), "What is 2 + 2?", Arc::new(EchoHandler::stdout(true)))
//!         .await?;
//!
//!     println!("Session ID: {:?}", outcome.session_id);
//!     outcome.check()?;
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod executor;
mod protocol;
mod truncate;
mod types;

// Re-export main types
pub use client::{ChannelHandler, EchoHandler};
pub use error::SdkError;
pub use executor::{ClaudeExecutor, StreamOutcome};
pub use protocol::{StreamHandler, StreamLine};
pub use truncate::{
    render_truncated, truncate_long_strings, DEFAULT_TRUNCATE_CHARS, TRUNCATION_MARKER,
};
pub use types::{AssistantMessage, ClaudeMessage, ContentItem, PermissionMode};
