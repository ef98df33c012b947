//! Sandbox backends.
//!
//! [`CsRunner`] drives the `cs` CLI. Other implementations (for example a
//! recording backend in tests) plug in through [`SandboxBackend`].

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::{create_command_args, shell_quote, CS_BIN};
use crate::env::EnvVarSet;
use crate::error::{Result, SandboxError};

/// Operations the provisioning entrypoint needs from a sandbox provider.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Provision a new sandbox instance.
    async fn create_sandbox(
        &self,
        name: &str,
        template: &str,
        pool: Option<&str>,
        env: &EnvVarSet,
    ) -> Result<()>;

    /// Write `content` to the absolute `path` inside the sandbox.
    async fn transfer_content(&self, name: &str, path: &str, content: &str) -> Result<()>;

    /// Create a directory (and parents) inside the sandbox.
    async fn mkdir(&self, name: &str, path: &str) -> Result<()>;

    /// Run a shell command inside the sandbox and wait for it.
    async fn exec(&self, name: &str, command: &str) -> Result<()>;
}

/// Backend that shells out to the `cs` CLI.
#[derive(Debug, Clone)]
pub struct CsRunner {
    cs_path: String,
}

impl CsRunner {
    pub fn new() -> Self {
        Self {
            cs_path: CS_BIN.to_string(),
        }
    }

    /// Use a specific `cs` binary.
    pub fn with_binary(cs_path: impl Into<String>) -> Self {
        Self {
            cs_path: cs_path.into(),
        }
    }

    /// `cs sandbox exec <name> -- <argv...>`
    fn exec_command(&self, name: &str, argv: &[&str]) -> Command {
        let mut cmd = Command::new(&self.cs_path);
        cmd.args(["sandbox", "exec", name, "--"]).args(argv);
        cmd
    }

    /// Run a command with optional stdin, capturing stderr for error reports.
    async fn run_captured(mut cmd: Command, stdin: Option<&str>) -> std::io::Result<(bool, String)> {
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let pipe = child.stdin.take();
        let write = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        // stderr is collected while stdin is still being written.
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        let success = output.status.success();
        if let Err(e) = written {
            if success {
                return Err(e);
            }
            debug!(error = %e, "stdin closed early by failing command");
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((success, stderr))
    }
}

impl Default for CsRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_reason(stderr: String, fallback: &str) -> String {
    if stderr.is_empty() {
        fallback.to_string()
    } else {
        stderr
    }
}

#[async_trait]
impl SandboxBackend for CsRunner {
    async fn create_sandbox(
        &self,
        name: &str,
        template: &str,
        pool: Option<&str>,
        env: &EnvVarSet,
    ) -> Result<()> {
        info!(sandbox = %name, template = %template, env_vars = env.len(), "Creating sandbox");

        let mut cmd = Command::new(&self.cs_path);
        cmd.args(create_command_args(name, template, pool, env));

        let (ok, stderr) = Self::run_captured(cmd, None)
            .await
            .map_err(|e| SandboxError::Provision {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if !ok {
            return Err(SandboxError::Provision {
                name: name.to_string(),
                reason: failure_reason(stderr, "cs sandbox create exited unsuccessfully"),
            });
        }
        Ok(())
    }

    async fn transfer_content(&self, name: &str, path: &str, content: &str) -> Result<()> {
        debug!(sandbox = %name, path = %path, bytes = content.len(), "Transferring content");

        let script = format!("cat > {}", shell_quote(path));
        let cmd = self.exec_command(name, &["sh", "-c", &script]);

        let transfer_err = |reason: String| SandboxError::Transfer {
            name: name.to_string(),
            path: path.to_string(),
            reason,
        };
        let (ok, stderr) = Self::run_captured(cmd, Some(content))
            .await
            .map_err(|e| transfer_err(e.to_string()))?;
        if !ok {
            return Err(transfer_err(failure_reason(stderr, "write exited unsuccessfully")));
        }
        Ok(())
    }

    async fn mkdir(&self, name: &str, path: &str) -> Result<()> {
        debug!(sandbox = %name, path = %path, "Creating directory");

        let cmd = self.exec_command(name, &["mkdir", "-p", path]);
        let mkdir_err = |reason: String| SandboxError::Transfer {
            name: name.to_string(),
            path: path.to_string(),
            reason,
        };
        let (ok, stderr) = Self::run_captured(cmd, None)
            .await
            .map_err(|e| mkdir_err(e.to_string()))?;
        if !ok {
            return Err(mkdir_err(failure_reason(stderr, "mkdir exited unsuccessfully")));
        }
        Ok(())
    }

    async fn exec(&self, name: &str, command: &str) -> Result<()> {
        info!(sandbox = %name, "Executing command in sandbox");

        // Output goes straight to the operator's terminal.
        let status = self
            .exec_command(name, &["bash", "-i", "-c", command])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| SandboxError::Exec {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(SandboxError::Exec {
                name: name.to_string(),
                reason: format!("exited with code {}", status.code().unwrap_or(-1)),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A fake `cs` that logs its argv and stdin to files next to it.
    fn fake_cs(dir: &Path, exit_code: i32) -> String {
        let path = dir.join("cs");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"{dir}/argv\"\ncat > \"{dir}/stdin\"\necho boom >&2\nexit {exit_code}\n",
            dir = dir.display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_transfer_pipes_content_through_exec() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path();
        let runner = CsRunner::with_binary(fake_cs(dir, 0));

        runner
            .transfer_content("sbx", "/home/owner/cmd/prompt.txt", "hello\nworld")
            .await
            .unwrap();

        let argv = std::fs::read_to_string(dir.join("argv")).unwrap();
        assert_eq!(
            argv.lines().collect::<Vec<_>>(),
            vec![
                "sandbox",
                "exec",
                "sbx",
                "--",
                "sh",
                "-c",
                "cat > /home/owner/cmd/prompt.txt"
            ]
        );
        assert_eq!(std::fs::read_to_string(dir.join("stdin")).unwrap(), "hello\nworld");
    }

    #[tokio::test]
    async fn test_large_transfer_with_noisy_stderr_completes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path();
        let cs = dir.join("cs");
        // Fills the stderr pipe before reading any stdin.
        let script = format!(
            "#!/bin/sh\nhead -c 200000 /dev/zero | tr '\\0' e >&2\ncat > \"{dir}/stdin\"\n",
            dir = dir.display()
        );
        std::fs::write(&cs, script).unwrap();
        std::fs::set_permissions(&cs, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = CsRunner::with_binary(cs.to_string_lossy());
        let content = "x".repeat(200_000);

        tokio::time::timeout(
            std::time::Duration::from_secs(30),
            runner.transfer_content("sbx", "/home/owner/cmd/prompt.txt", &content),
        )
        .await
        .expect("transfer should not stall")
        .unwrap();

        assert_eq!(std::fs::read_to_string(dir.join("stdin")).unwrap().len(), 200_000);
    }

    #[tokio::test]
    async fn test_create_failure_reports_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path();
        let runner = CsRunner::with_binary(fake_cs(dir, 1));

        let err = runner
            .create_sandbox("sbx", "tpl", None, &EnvVarSet::new())
            .await
            .unwrap_err();
        match err {
            SandboxError::Provision { name, reason } => {
                assert_eq!(name, "sbx");
                assert_eq!(reason, "boom");
            }
            other => panic!("expected Provision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_transfer_error() {
        let runner = CsRunner::with_binary("/nonexistent/cs");
        let err = runner.mkdir("sbx", "/tmp/x").await.unwrap_err();
        assert!(matches!(err, SandboxError::Transfer { .. }));
    }
}
