//! Best-effort environment preparation before the worker pass.
//!
//! Every step here may fail without stopping the worker; `run_setup` logs a
//! warning and moves on.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{GitHubContext, WorkerConfig};
use crate::error::WorkerError;

/// Tools allowed when no whitelist was provided.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "MultiEdit",
    "LS",
    "Glob",
    "Grep",
    "Bash",
    "Task",
    "TodoRead",
    "TodoWrite",
    "NotebookRead",
    "NotebookEdit",
    "WebFetch",
    "WebSearch",
];

#[derive(Debug, Serialize)]
struct Settings<'a> {
    permissions: Permissions<'a>,
}

#[derive(Debug, Serialize)]
struct Permissions<'a> {
    allow: Vec<&'a str>,
    deny: Vec<&'a str>,
}

/// Run all setup steps, logging failures.
pub async fn run_setup(config: &WorkerConfig) {
    let github = &config.github;
    info!(
        repo = ?github.repo,
        branch = ?github.branch,
        action_type = ?github.action_type,
        pr_number = ?github.pr_number,
        issue_number = ?github.issue_number,
        "GitHub context"
    );

    let external_mcp = config.external_mcp.as_deref();
    if let Err(e) = write_central_mcp_config(external_mcp, &config.home_dir).await {
        warn!(error = %e, "Failed writing central MCP config");
    }

    let gh = GhCli::default();
    if let Err(e) = gh.ensure_auth(config.github.token.as_deref()).await {
        warn!(error = %e, "GitHub authentication unavailable");
    }

    if has_repo_context(&config.github) {
        if let Err(e) = gh.prepare_repo(&config.repo_dir, &config.github).await {
            warn!(error = %e, repo_dir = %config.repo_dir.display(), "Failed preparing repository");
        }
    }

    if config.repo_dir.is_dir() {
        if let Err(e) = write_repo_permissions(&config.repo_dir, &config.allowed_tools).await {
            warn!(error = %e, "Failed generating repo permissions");
        }
    }
}

fn has_repo_context(github: &GitHubContext) -> bool {
    github.repo.is_some() || github.branch.is_some()
}

/// Write `<home>/.mcp.json` from the external MCP config, if one was given.
///
/// A top-level `servers` map is renamed to `mcpServers`. Returns the path
/// written.
pub async fn write_central_mcp_config(
    external: Option<&str>,
    home_dir: &Path,
) -> Result<Option<PathBuf>, WorkerError> {
    let Some(external) = external else {
        return Ok(None);
    };
    let external: Value = serde_json::from_str(external).map_err(|e| WorkerError::Setup {
        step: "mcp-config",
        reason: format!("external MCP config is not valid JSON: {e}"),
    })?;
    let Value::Object(map) = &external else {
        return Err(WorkerError::Setup {
            step: "mcp-config",
            reason: "external MCP config must be a JSON object".to_string(),
        });
    };

    let mut central = Map::new();
    for (key, value) in map {
        let key = if key == "servers" && !map.contains_key("mcpServers") {
            "mcpServers".to_string()
        } else {
            key.clone()
        };
        central.insert(key, value.clone());
    }

    let path = home_dir.join(".mcp.json");
    write_json(&path, &Value::Object(central)).await?;
    info!(path = %path.display(), "Wrote central MCP config");
    Ok(Some(path))
}

/// Write `<repo>/.claude/settings.local.json` allowing `tools`, or the
/// default tool list when `tools` is empty.
pub async fn write_repo_permissions(
    repo_dir: &Path,
    tools: &[String],
) -> Result<PathBuf, WorkerError> {
    let allow: Vec<&str> = if tools.is_empty() {
        DEFAULT_ALLOWED_TOOLS.to_vec()
    } else {
        tools.iter().map(String::as_str).collect()
    };
    let source = if tools.is_empty() { "fallback" } else { "whitelist" };

    let settings = Settings {
        permissions: Permissions {
            allow,
            deny: Vec::new(),
        },
    };
    let value = serde_json::to_value(&settings).map_err(|e| WorkerError::Setup {
        step: "permissions",
        reason: e.to_string(),
    })?;

    let path = repo_dir.join(".claude").join("settings.local.json");
    write_json(&path, &value).await?;
    info!(
        path = %path.display(),
        tools = settings.permissions.allow.len(),
        source,
        "Wrote repo permissions"
    );
    Ok(path)
}

async fn write_json(path: &Path, value: &Value) -> Result<(), WorkerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut content = serde_json::to_string_pretty(value).map_err(|e| WorkerError::Setup {
        step: "write-json",
        reason: e.to_string(),
    })?;
    content.push('\n');
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Thin wrapper over the `gh` and `git` CLIs.
#[derive(Debug, Clone)]
pub struct GhCli {
    gh: String,
    git: String,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            gh: "gh".to_string(),
            git: "git".to_string(),
        }
    }
}

impl GhCli {
    #[cfg(test)]
    fn with_binaries(gh: impl Into<String>, git: impl Into<String>) -> Self {
        Self {
            gh: gh.into(),
            git: git.into(),
        }
    }

    /// Make sure `gh` is authenticated, logging in with `token` if needed.
    pub async fn ensure_auth(&self, token: Option<&str>) -> Result<(), WorkerError> {
        if self.status_ok().await {
            debug!("GitHub CLI already authenticated");
            return Ok(());
        }

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            info!("Logging in to GitHub CLI with token");
            let login = run_with_stdin(&self.gh, &["auth", "login", "--with-token"], token).await;
            match login {
                Ok(true) => {
                    if !run_quiet(&self.gh, &["auth", "setup-git"], None).await.unwrap_or(false) {
                        warn!("gh auth setup-git failed");
                    }
                    return Ok(());
                }
                Ok(false) => warn!("gh auth login failed"),
                Err(e) => warn!(error = %e, "gh auth login could not run"),
            }
        }

        if self.status_ok().await {
            Ok(())
        } else {
            Err(WorkerError::Setup {
                step: "github-auth",
                reason: "gh is not authenticated".to_string(),
            })
        }
    }

    async fn status_ok(&self) -> bool {
        run_quiet(&self.gh, &["auth", "status"], None)
            .await
            .unwrap_or(false)
    }

    /// Clone the repo into `repo_dir` if missing, then check out the branch.
    pub async fn prepare_repo(
        &self,
        repo_dir: &Path,
        github: &GitHubContext,
    ) -> Result<(), WorkerError> {
        let branch = github.branch.as_deref();

        if repo_dir.is_dir() {
            if let Some(branch) = branch {
                info!(branch = %branch, "Updating existing checkout");
                self.git(repo_dir, &["fetch", "--all", "--quiet"]).await?;
                self.git(repo_dir, &["checkout", branch]).await?;
            }
            return Ok(());
        }

        let Some(repo) = github.repo.as_deref() else {
            return Err(WorkerError::Setup {
                step: "repo-clone",
                reason: "github repo is required to clone".to_string(),
            });
        };

        let (parent, dir_name) = match (repo_dir.parent(), repo_dir.file_name()) {
            (Some(parent), Some(name)) => (parent, name.to_string_lossy().into_owned()),
            _ => {
                return Err(WorkerError::Setup {
                    step: "repo-clone",
                    reason: format!("invalid repo dir: {}", repo_dir.display()),
                })
            }
        };
        tokio::fs::create_dir_all(parent).await?;

        info!(repo = %repo, dir = %repo_dir.display(), "Cloning repository");
        if !run_quiet(&self.gh, &["repo", "clone", repo, dir_name.as_str()], Some(parent)).await? {
            return Err(WorkerError::Setup {
                step: "repo-clone",
                reason: format!("gh repo clone {repo} failed"),
            });
        }

        if let Some(branch) = branch {
            self.git(repo_dir, &["checkout", branch]).await?;
        }
        Ok(())
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<(), WorkerError> {
        if run_quiet(&self.git, args, Some(dir)).await? {
            Ok(())
        } else {
            Err(WorkerError::Setup {
                step: "git",
                reason: format!("git {} failed", args.join(" ")),
            })
        }
    }
}

async fn run_quiet(program: &str, args: &[&str], dir: Option<&Path>) -> std::io::Result<bool> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    Ok(cmd.status().await?.success())
}

async fn run_with_stdin(program: &str, args: &[&str], input: &str) -> std::io::Result<bool> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await?;
    }
    Ok(child.wait().await?.success())
}
