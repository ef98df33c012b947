//! Claude Code executor for running agents via subprocess.
//!
//! This module provides the main `ClaudeExecutor` type for executing
//! Claude Code agents in one-shot mode with streaming JSON output.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::SdkError;
use crate::protocol::{StreamHandler, StreamLine};
use crate::types::PermissionMode;

/// Name of the central MCP configuration file under the home directory.
const MCP_CONFIG_FILE: &str = ".mcp.json";

/// What happened during one run of the agent.
///
/// Stream and exit failures are recorded here rather than returned as errors
/// so that the caller can persist task state before surfacing them.
#[derive(Debug)]
pub struct StreamOutcome {
    /// Session id from the last `system` message that carried one.
    pub session_id: Option<String>,

    /// Number of non-empty stdout lines seen.
    pub lines: u64,

    /// Exit code, `None` if the process was killed by a signal or could not
    /// be waited on.
    pub exit_code: Option<i32>,

    /// Whether the process exited successfully.
    pub success: bool,

    /// Error that stopped the stdout drain early.
    pub read_error: Option<std::io::Error>,
}

impl StreamOutcome {
    /// Convert recorded failures into an error. A read error takes priority
    /// over a non-zero exit.
    pub fn check(self) -> Result<Option<String>, SdkError> {
        if let Some(e) = self.read_error {
            return Err(SdkError::StreamRead(e));
        }
        if !self.success {
            return Err(SdkError::ProcessExit {
                code: self.exit_code.unwrap_or(-1),
            });
        }
        Ok(self.session_id)
    }
}

/// Result of draining stdout to EOF.
struct DrainReport {
    session_id: Option<String>,
    lines: u64,
    error: Option<std::io::Error>,
}

/// Executor for Claude Code agents.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use sandcrew_claude_sdk::{ClaudeExecutor, EchoHandler};
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = ClaudeExecutor::new("claude")
///         .with_allowed_tools(vec!["Read".to_string(), "Grep".to_string()]);
///
///     let outcome = executor
///         .execute(Path::new("."), "Summarize the README", Arc::new(EchoHandler::stdout(false)))
///         .await?;
///
///     println!("Session: {:?}", outcome.session_id);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    /// Path to the Claude CLI executable.
    claude_path: String,

    /// Home directory searched for the central MCP config.
    home_dir: Option<PathBuf>,

    /// Permission mode to use.
    permission_mode: PermissionMode,

    /// Tools passed via `--allowedTools`.
    allowed_tools: Vec<String>,

    /// Tools passed via `--disallowedTools`.
    disallowed_tools: Vec<String>,
}

impl ClaudeExecutor {
    /// Create a new executor with the given path to the Claude CLI.
    ///
    /// The path can be just "claude" to use PATH lookup, or a full path.
    pub fn new(claude_path: impl Into<String>) -> Self {
        Self {
            claude_path: claude_path.into(),
            home_dir: None,
            permission_mode: PermissionMode::Default,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
        }
    }

    /// Set the home directory holding `.mcp.json`.
    pub fn with_home_dir(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home_dir.into());
        self
    }

    /// Set the permission mode.
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Set the tool allow-list.
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Set the tool deny-list.
    pub fn with_disallowed_tools(mut self, tools: Vec<String>) -> Self {
        self.disallowed_tools = tools;
        self
    }

    /// Path of the central MCP config, if it exists as a regular file.
    fn mcp_config_path(&self) -> Option<PathBuf> {
        let path = self.home_dir.as_ref()?.join(MCP_CONFIG_FILE);
        path.is_file().then_some(path)
    }

    /// Build the CLI arguments for a prompt.
    ///
    /// Order is fixed: `--mcp-config` (when present), output flags, permission
    /// mode, tool lists, then the prompt as the last positional argument.
    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(mcp) = self.mcp_config_path() {
            args.push("--mcp-config".to_string());
            args.push(mcp.to_string_lossy().into_owned());
        }

        // stream-json output requires --verbose in --print mode
        args.extend(
            ["--print", "--output-format", "stream-json", "--verbose"]
                .iter()
                .map(|s| s.to_string()),
        );

        args.push("--permission-mode".to_string());
        args.push(self.permission_mode.as_str().to_string());

        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(self.disallowed_tools.join(","));
        }

        args.push(prompt.to_string());
        args
    }

    /// Execute a prompt with Claude Code in `working_dir`.
    ///
    /// Fails before spawning if the prompt is empty or `working_dir` is not a
    /// directory, and with [`SdkError::Launch`] if the process cannot start.
    /// Everything after a successful spawn is reported in the [`StreamOutcome`].
    pub async fn execute(
        &self,
        working_dir: &Path,
        prompt: &str,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<StreamOutcome, SdkError> {
        if prompt.trim().is_empty() {
            return Err(SdkError::Validation("missing prompt".to_string()));
        }
        if !working_dir.is_dir() {
            return Err(SdkError::Validation(format!(
                "working directory not found or not a directory: {}",
                working_dir.display()
            )));
        }

        let args = self.build_args(prompt);

        info!(
            claude_path = %self.claude_path,
            working_dir = %working_dir.display(),
            prompt_len = prompt.len(),
            permission_mode = %self.permission_mode,
            allowed_tools = self.allowed_tools.len(),
            "Preparing Claude execution"
        );

        let mut cmd = Command::new(&self.claude_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        debug!(args = ?&args[..args.len() - 1], "Claude arguments (prompt omitted)");

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, claude_path = %self.claude_path, "Failed to spawn Claude process");
            SdkError::Launch {
                program: self.claude_path.clone(),
                source: e,
            }
        })?;

        info!(pid = ?child.id(), "Claude process spawned");

        let stdout = child.stdout.take().ok_or_else(|| SdkError::Launch {
            program: self.claude_path.clone(),
            source: std::io::Error::other("failed to capture stdout"),
        })?;

        // Forward stderr to the log
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break, // EOF
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(stderr = %trimmed, "Claude stderr");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Error reading Claude stderr");
                            break;
                        }
                    }
                }
            });
        }

        // The drain must run while the process does, or a full pipe blocks it.
        let drain = tokio::spawn(drain_stdout(stdout, handler));
        let (drained, status) = tokio::join!(drain, child.wait());

        let report = drained.unwrap_or_else(|e| DrainReport {
            session_id: None,
            lines: 0,
            error: Some(std::io::Error::other(format!("stdout reader failed: {e}"))),
        });

        let (exit_code, success) = match status {
            Ok(status) => exit_summary(status),
            Err(e) => {
                error!(error = %e, "Failed waiting for Claude process");
                (None, false)
            }
        };

        info!(
            exit_code = ?exit_code,
            success,
            lines = report.lines,
            session_id = ?report.session_id,
            "Claude process exited"
        );

        Ok(StreamOutcome {
            session_id: report.session_id,
            lines: report.lines,
            exit_code,
            success,
            read_error: report.error,
        })
    }
}

impl Default for ClaudeExecutor {
    fn default() -> Self {
        Self::new("claude")
    }
}

fn exit_summary(status: ExitStatus) -> (Option<i32>, bool) {
    (status.code(), status.success())
}

/// Read stdout to EOF, tracking the latest announced session id.
///
/// Lines are split on raw bytes; invalid UTF-8 is replaced rather than
/// treated as a read failure.
async fn drain_stdout<R>(stdout: R, handler: Arc<dyn StreamHandler>) -> DrainReport
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut report = DrainReport {
        session_id: None,
        lines: 0,
        error: None,
    };

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(total_lines = report.lines, "Claude stdout closed (EOF)");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let text = line.trim_end_matches(['\n', '\r']);
                if text.trim().is_empty() {
                    continue;
                }
                report.lines += 1;

                let parsed = StreamLine::parse(text);
                if let Some(sid) = parsed.session_id() {
                    debug!(session_id = %sid, "Captured session ID");
                    report.session_id = Some(sid.to_string());
                }

                let result = match &parsed {
                    StreamLine::Message { message, raw } => {
                        debug!(kind = message.kind(), "Parsed Claude message");
                        handler.on_message(message, raw).await
                    }
                    StreamLine::Text(text) => handler.on_text(text).await,
                };
                if let Err(e) = result {
                    warn!(error = %e, "Handler error processing line");
                }
            }
            Err(e) => {
                error!(error = %e, "Error reading Claude stdout");
                report.error = Some(e);
                break;
            }
        }
    }

    report
}
