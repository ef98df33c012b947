//! Worker configuration.
//!
//! Resolved once at startup from an environment snapshot and the files the
//! host dropped into the command directory. Nothing here writes back to the
//! process environment.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use sandcrew_claude_sdk::PermissionMode;
use thiserror::Error;

/// Command directory used when `CMD_DIR` is unset.
pub const DEFAULT_CMD_DIR: &str = "/home/owner/cmd";

/// Repository checkout location relative to the home directory.
const DEFAULT_REPO_DIR: &str = "claude/target-repo";

const PROMPT_FILE: &str = "prompt.txt";

/// Environment captured once in `main`.
pub type EnvSnapshot = HashMap<String, String>;

/// Capture the current process environment.
pub fn capture_env() -> EnvSnapshot {
    std::env::vars().collect()
}

/// Errors resolving the worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME is not set")]
    MissingHome,

    #[error("command directory not found: {}", .0.display())]
    MissingCmdDir(PathBuf),

    #[error("command path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// GitHub context for the target repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitHubContext {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub token: Option<String>,
    pub pr_number: Option<String>,
    pub issue_number: Option<String>,
    pub action_type: Option<String>,
}

/// Everything one worker pass needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cmd_dir: PathBuf,
    pub home_dir: PathBuf,
    pub state_path: PathBuf,
    pub session_path: PathBuf,
    /// Checkout the agent works in.
    pub repo_dir: PathBuf,
    pub claude_bin: String,
    pub debug: bool,
    pub permission_mode: PermissionMode,
    pub github: GitHubContext,
    /// Parsed `tool_whitelist.txt`; empty means no `--allowedTools`.
    pub allowed_tools: Vec<String>,
    /// Contents of `external_mcp.txt`, parsed during setup.
    pub external_mcp: Option<String>,
    /// Name of the prompt file the prompt was read from.
    pub prompt_file: String,
    /// Prompt text; may be empty.
    pub prompt: String,
    pub task_mode: String,
    pub task_id: Option<String>,
}

impl WorkerConfig {
    /// Resolve configuration from `env` and the command directory it names.
    pub fn resolve(env: &EnvSnapshot) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            env.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let home_dir = PathBuf::from(var("HOME").ok_or(ConfigError::MissingHome)?);
        let cmd_dir = PathBuf::from(var("CMD_DIR").unwrap_or_else(|| DEFAULT_CMD_DIR.to_string()));

        if !cmd_dir.exists() {
            return Err(ConfigError::MissingCmdDir(cmd_dir));
        }
        if !cmd_dir.is_dir() {
            return Err(ConfigError::NotADirectory(cmd_dir));
        }

        let state_path = var("STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("state.json"));
        let session_path = var("SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("session.json"));

        let repo_dir = match var("CUSTOM_REPO_PATH") {
            Some(custom) => {
                let custom = PathBuf::from(custom);
                if custom.is_absolute() {
                    custom
                } else {
                    home_dir.join(custom)
                }
            }
            None => home_dir.join(DEFAULT_REPO_DIR),
        };

        let permission_mode = var("PERMISSION_MODE")
            .unwrap_or_default()
            .parse::<PermissionMode>()
            .map_err(|e| ConfigError::Invalid {
                name: "PERMISSION_MODE".to_string(),
                reason: e.to_string(),
            })?;

        let file = |name: &str| read_trimmed(&cmd_dir, name);

        // The sandbox environment wins over cmd-dir files.
        let github = GitHubContext {
            repo: var("GITHUB_REPO").or(file("github_repo.txt")?),
            branch: var("GITHUB_BRANCH").or(file("github_branch.txt")?),
            token: var("GITHUB_TOKEN").or(file("github_token.txt")?),
            pr_number: file("pr_number.txt")?,
            issue_number: file("issue_number.txt")?,
            action_type: file("action_type.txt")?,
        };

        let allowed_tools = match file("tool_whitelist.txt")? {
            Some(raw) => parse_tool_whitelist(&raw)?,
            None => Vec::new(),
        };

        let (prompt_file, prompt) = read_prompt(&cmd_dir)?;

        Ok(Self {
            home_dir,
            state_path,
            session_path,
            repo_dir,
            claude_bin: var("CLAUDE_BIN").unwrap_or_else(|| "claude".to_string()),
            debug: var("DEBUG_MODE").as_deref() == Some("true"),
            permission_mode,
            github,
            allowed_tools,
            external_mcp: file("external_mcp.txt")?,
            prompt_file,
            prompt,
            task_mode: file("task_mode.txt")?.unwrap_or_else(|| "create".to_string()),
            task_id: file("task_id.txt")?,
            cmd_dir,
        })
    }

    /// Directory the agent runs in: the repo checkout, or home when there is none.
    pub fn work_dir(&self) -> &Path {
        if self.repo_dir.is_dir() {
            &self.repo_dir
        } else {
            &self.home_dir
        }
    }
}

/// Read the prompt named by `prompt_filename.txt`, falling back to `prompt.txt`.
///
/// Returns the file name used and its content. A missing prompt is empty.
pub fn read_prompt(cmd_dir: &Path) -> Result<(String, String), ConfigError> {
    if let Some(name) = read_trimmed(cmd_dir, "prompt_filename.txt")? {
        if name.contains('/') || name == ".." {
            return Err(ConfigError::Invalid {
                name: "prompt_filename.txt".to_string(),
                reason: format!("not a file name: {name}"),
            });
        }
        if let Some(prompt) = read_optional(&cmd_dir.join(&name))? {
            return Ok((name, prompt));
        }
    }

    let prompt = read_optional(&cmd_dir.join(PROMPT_FILE))?.unwrap_or_default();
    Ok((PROMPT_FILE.to_string(), prompt))
}

/// Parse a tool whitelist: a JSON array of names, or one name per line.
pub fn parse_tool_whitelist(raw: &str) -> Result<Vec<String>, ConfigError> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(raw).map_err(|e| ConfigError::Invalid {
            name: "tool_whitelist.txt".to_string(),
            reason: e.to_string(),
        });
    }
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn read_trimmed(dir: &Path, name: &str) -> Result<Option<String>, ConfigError> {
    Ok(read_optional(&dir.join(name))?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}
