//! Declarative launch requests and the transfer plan they produce.

use std::fmt::Write as _;

use tracing::info;

use crate::backend::SandboxBackend;
use crate::command::build_create_command;
use crate::env::EnvVarSet;
use crate::error::{Result, SandboxError};

/// Worker command directory inside the sandbox.
pub const DEFAULT_CMD_DIR: &str = "/home/owner/cmd";

/// Directory holding agent definitions inside the sandbox.
pub const AGENTS_DIR: &str = "/home/owner/.claude/agents";

/// Sandbox template used when none is given.
pub const DEFAULT_TEMPLATE: &str = "claude-code-automation";

/// Command that runs the worker once inside the sandbox.
pub const WORKER_START_COMMAND: &str = "~/claude/dev-worker/start-worker.sh";

/// Secret reference resolved by the sandbox provider, never a literal key.
const ANTHROPIC_KEY_SECRET: &str = "${secret:shared/anthropic-apikey-eng}";

/// What the agent should work on in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Branch(String),
    Pr(String),
    Issue(String),
}

impl Target {
    /// Value written to `action_type.txt` and `ACTION_TYPE`.
    pub fn action_type(&self) -> &'static str {
        match self {
            Target::Branch(_) => "branch",
            Target::Pr(_) => "pr",
            Target::Issue(_) => "issue",
        }
    }

    /// Pick the target from optional inputs; a PR wins over an issue, which
    /// wins over a branch.
    pub fn select(pr: Option<&str>, issue: Option<&str>, branch: Option<&str>) -> Option<Self> {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        present(pr)
            .map(Target::Pr)
            .or_else(|| present(issue).map(Target::Issue))
            .or_else(|| present(branch).map(Target::Branch))
    }
}

/// An agent definition shipped into the sandbox as `<name>.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFile {
    pub name: String,
    pub content: String,
}

/// One step of the transfer plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Create a directory.
    Mkdir { path: String },
    /// Write a file.
    File { path: String, content: String },
}

impl Transfer {
    pub fn path(&self) -> &str {
        match self {
            Transfer::Mkdir { path } | Transfer::File { path, .. } => path,
        }
    }
}

/// Everything needed to create (or resume) a sandbox and configure its worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Sandbox name; the existing sandbox when `resume` is set.
    pub name: String,
    pub template: String,
    pub pool: Option<String>,
    /// Skip creation and reuse `name`.
    pub resume: bool,
    pub delete_when_done: bool,
    pub debug: bool,
    pub cmd_dir: String,
    pub custom_repo_path: Option<String>,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    /// Branch to check out, transferred even when a PR or issue is the target.
    pub github_branch: Option<String>,
    pub pr_number: Option<String>,
    pub issue_number: Option<String>,
    pub prompt: String,
    pub external_mcp: Option<String>,
    pub tool_whitelist: Option<String>,
    pub task_id: Option<String>,
    pub agents: Vec<AgentFile>,
}

impl LaunchSpec {
    /// A create-mode spec with defaults for everything but name and prompt.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: DEFAULT_TEMPLATE.to_string(),
            pool: None,
            resume: false,
            delete_when_done: true,
            debug: false,
            cmd_dir: DEFAULT_CMD_DIR.to_string(),
            custom_repo_path: None,
            github_repo: None,
            github_token: None,
            github_branch: None,
            pr_number: None,
            issue_number: None,
            prompt: prompt.into(),
            external_mcp: None,
            tool_whitelist: None,
            task_id: None,
            agents: Vec::new(),
        }
    }

    /// Check required inputs before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SandboxError::Validation("sandbox name is required".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(SandboxError::Validation("prompt is required".into()));
        }
        if !self.cmd_dir.starts_with('/') {
            return Err(SandboxError::Validation(format!(
                "cmd dir must be absolute: {}",
                self.cmd_dir
            )));
        }
        if let Some(agent) = self.agents.iter().find(|a| !is_valid_agent_name(&a.name)) {
            return Err(SandboxError::Validation(format!(
                "invalid agent name: {:?}",
                agent.name
            )));
        }
        Ok(())
    }

    pub fn target(&self) -> Option<Target> {
        Target::select(
            self.pr_number.as_deref(),
            self.issue_number.as_deref(),
            self.github_branch.as_deref(),
        )
    }

    /// `prompt.txt` on create, `prompt_new.txt` on resume.
    pub fn prompt_filename(&self) -> &'static str {
        if self.resume {
            "prompt_new.txt"
        } else {
            "prompt.txt"
        }
    }

    pub fn task_mode(&self) -> &'static str {
        if self.resume {
            "resume"
        } else {
            "create"
        }
    }

    /// Environment injected at provisioning time.
    pub fn env_vars(&self) -> EnvVarSet {
        let mut env = EnvVarSet::new();
        env.set("SHOULD_DELETE", bool_str(self.delete_when_done))
            .set("DEBUG_MODE", bool_str(self.debug))
            .set("ANTHROPIC_API_KEY", ANTHROPIC_KEY_SECRET)
            .set("GH_PROMPT_DISABLED", "1")
            .set_if_present("CUSTOM_REPO_PATH", self.custom_repo_path.as_deref())
            .set_if_present("GITHUB_REPO", self.github_repo.as_deref())
            .set_if_present("GITHUB_TOKEN", self.github_token.as_deref());

        if let Some(target) = self.target() {
            let (key, value) = match &target {
                Target::Pr(n) => ("PR_NUMBER", n),
                Target::Issue(n) => ("ISSUE_NUMBER", n),
                Target::Branch(b) => ("GITHUB_BRANCH", b),
            };
            env.set(key, value.as_str())
                .set("ACTION_TYPE", target.action_type());
        }
        env
    }

    /// The preview of `cs sandbox create` for this spec.
    pub fn create_command(&self) -> String {
        build_create_command(&self.name, &self.template, self.pool.as_deref(), &self.env_vars())
    }

    /// Ordered content transfers into the sandbox.
    pub fn transfers(&self) -> Vec<Transfer> {
        let cmd_dir = self.cmd_dir.trim_end_matches('/');
        let file = |name: &str, content: &str| Transfer::File {
            path: format!("{cmd_dir}/{name}"),
            content: content.to_string(),
        };
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        let mut plan = vec![file(self.prompt_filename(), &self.prompt)];

        let optional = [
            ("external_mcp.txt", non_empty(&self.external_mcp)),
            ("tool_whitelist.txt", non_empty(&self.tool_whitelist)),
            ("github_repo.txt", non_empty(&self.github_repo)),
            ("github_token.txt", non_empty(&self.github_token)),
            ("github_branch.txt", non_empty(&self.github_branch)),
            ("pr_number.txt", non_empty(&self.pr_number)),
            ("issue_number.txt", non_empty(&self.issue_number)),
            (
                "action_type.txt",
                self.target().map(|t| t.action_type().to_string()),
            ),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                plan.push(file(name, &value));
            }
        }

        plan.push(file("task_mode.txt", self.task_mode()));
        if let Some(task_id) = non_empty(&self.task_id) {
            plan.push(file("task_id.txt", &task_id));
        }
        plan.push(file("prompt_filename.txt", self.prompt_filename()));

        if !self.agents.is_empty() {
            plan.push(Transfer::Mkdir {
                path: AGENTS_DIR.to_string(),
            });
            let mut agents: Vec<&AgentFile> = self.agents.iter().collect();
            agents.sort_by(|a, b| a.name.cmp(&b.name));
            for agent in agents {
                plan.push(Transfer::File {
                    path: format!("{AGENTS_DIR}/{}.md", agent.name),
                    content: agent.content.clone(),
                });
            }
        }

        plan
    }

    /// Human-readable summary of what `provision` would do.
    pub fn dry_run_report(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "--- DRY RUN ---");
        let _ = writeln!(out, "sandbox: {} ({})", self.name, self.task_mode());
        let optional_lines = [
            ("repo", &self.github_repo),
            ("branch", &self.github_branch),
            ("pr", &self.pr_number),
            ("issue", &self.issue_number),
        ];
        for (label, value) in optional_lines {
            if let Some(v) = value.as_deref().filter(|s| !s.is_empty()) {
                let _ = writeln!(out, "{label}: {v}");
            }
        }
        let _ = writeln!(out, "template: {}", self.template);
        if let Some(pool) = self.pool.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "pool: {pool}");
        }
        let _ = writeln!(out, "delete-when-done: {}", yes_no(self.delete_when_done));
        let _ = writeln!(out, "debug: {}", yes_no(self.debug));
        if let Some(path) = self.custom_repo_path.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "repo-path: {path}");
        }
        for transfer in self.transfers() {
            match transfer {
                Transfer::Mkdir { path } => {
                    let _ = writeln!(out, "will create: {path}");
                }
                Transfer::File { path, .. } => {
                    let _ = writeln!(out, "will transfer: {path}");
                }
            }
        }
        if !self.agents.is_empty() {
            let _ = writeln!(out, "agents: {} files -> {AGENTS_DIR}", self.agents.len());
        }
        let _ = writeln!(out, "--------------");
        out
    }
}

/// Create the sandbox (unless resuming) and apply the transfer plan in order.
///
/// Stops at the first failure.
pub async fn provision(backend: &dyn SandboxBackend, spec: &LaunchSpec) -> Result<()> {
    spec.validate()?;

    if spec.resume {
        info!(sandbox = %spec.name, "Resuming sandbox");
    } else {
        info!(sandbox = %spec.name, template = %spec.template, "Creating sandbox");
        backend
            .create_sandbox(
                &spec.name,
                &spec.template,
                spec.pool.as_deref(),
                &spec.env_vars(),
            )
            .await?;
    }

    let plan = spec.transfers();
    for step in &plan {
        match step {
            Transfer::Mkdir { path } => backend.mkdir(&spec.name, path).await?,
            Transfer::File { path, content } => {
                backend.transfer_content(&spec.name, path, content).await?
            }
        }
    }

    info!(sandbox = %spec.name, steps = plan.len(), "Sandbox configured");
    Ok(())
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every backend call; fails transfers to `fail_on` if set.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SandboxBackend for RecordingBackend {
        async fn create_sandbox(
            &self,
            name: &str,
            template: &str,
            _pool: Option<&str>,
            env: &EnvVarSet,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {name} {template} env={}", env.len()));
            Ok(())
        }

        async fn transfer_content(&self, name: &str, path: &str, _content: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(SandboxError::Transfer {
                    name: name.to_string(),
                    path: path.to_string(),
                    reason: "denied".to_string(),
                });
            }
            self.calls.lock().unwrap().push(format!("put {path}"));
            Ok(())
        }

        async fn mkdir(&self, _name: &str, path: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("mkdir {path}"));
            Ok(())
        }

        async fn exec(&self, _name: &str, command: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("exec {command}"));
            Ok(())
        }
    }

    fn full_spec() -> LaunchSpec {
        let mut spec = LaunchSpec::new("cw-repo-12-0001", "Fix the bug");
        spec.pool = Some("mypool".into());
        spec.github_repo = Some("org/repo".into());
        spec.github_token = Some("tok".into());
        spec.github_branch = Some("main".into());
        spec.pr_number = Some("12".into());
        spec.external_mcp = Some("{}".into());
        spec.tool_whitelist = Some("[\"Read\"]".into());
        spec.task_id = Some("task-123".into());
        spec.agents = vec![
            AgentFile {
                name: "reviewer".into(),
                content: "review".into(),
            },
            AgentFile {
                name: "planner".into(),
                content: "plan".into(),
            },
        ];
        spec
    }

    fn paths(plan: &[Transfer]) -> Vec<&str> {
        plan.iter().map(Transfer::path).collect()
    }

    #[test]
    fn test_transfer_order_on_create() {
        let spec = full_spec();
        assert_eq!(
            paths(&spec.transfers()),
            vec![
                "/home/owner/cmd/prompt.txt",
                "/home/owner/cmd/external_mcp.txt",
                "/home/owner/cmd/tool_whitelist.txt",
                "/home/owner/cmd/github_repo.txt",
                "/home/owner/cmd/github_token.txt",
                "/home/owner/cmd/github_branch.txt",
                "/home/owner/cmd/pr_number.txt",
                "/home/owner/cmd/action_type.txt",
                "/home/owner/cmd/task_mode.txt",
                "/home/owner/cmd/task_id.txt",
                "/home/owner/cmd/prompt_filename.txt",
                "/home/owner/.claude/agents",
                "/home/owner/.claude/agents/planner.md",
                "/home/owner/.claude/agents/reviewer.md",
            ]
        );
    }

    #[test]
    fn test_minimal_resume_plan() {
        let mut spec = LaunchSpec::new("existing", "continue");
        spec.resume = true;

        let plan = spec.transfers();
        assert_eq!(
            plan,
            vec![
                Transfer::File {
                    path: "/home/owner/cmd/prompt_new.txt".into(),
                    content: "continue".into()
                },
                Transfer::File {
                    path: "/home/owner/cmd/task_mode.txt".into(),
                    content: "resume".into()
                },
                Transfer::File {
                    path: "/home/owner/cmd/prompt_filename.txt".into(),
                    content: "prompt_new.txt".into()
                },
            ]
        );
    }

    #[test]
    fn test_action_type_content_follows_priority() {
        let spec = full_spec();
        let action = spec
            .transfers()
            .into_iter()
            .find(|t| t.path().ends_with("action_type.txt"))
            .unwrap();
        assert_eq!(
            action,
            Transfer::File {
                path: "/home/owner/cmd/action_type.txt".into(),
                content: "pr".into()
            }
        );
    }

    #[test]
    fn test_env_vars_with_pr_target() {
        let env = full_spec().env_vars();
        assert_eq!(env.get("SHOULD_DELETE"), Some("true"));
        assert_eq!(env.get("DEBUG_MODE"), Some("false"));
        assert_eq!(env.get("ANTHROPIC_API_KEY"), Some(ANTHROPIC_KEY_SECRET));
        assert_eq!(env.get("GH_PROMPT_DISABLED"), Some("1"));
        assert_eq!(env.get("GITHUB_REPO"), Some("org/repo"));
        assert_eq!(env.get("GITHUB_TOKEN"), Some("tok"));
        assert_eq!(env.get("PR_NUMBER"), Some("12"));
        assert_eq!(env.get("ACTION_TYPE"), Some("pr"));
        // Only one target is injected.
        assert_eq!(env.get("GITHUB_BRANCH"), None);
        assert_eq!(env.get("ISSUE_NUMBER"), None);
    }

    #[test]
    fn test_env_vars_with_branch_target() {
        let mut spec = LaunchSpec::new("sbx", "p");
        spec.github_branch = Some("feature/x".into());
        spec.custom_repo_path = Some("workdir".into());
        spec.debug = true;
        spec.delete_when_done = false;

        let env = spec.env_vars();
        assert_eq!(env.get("GITHUB_BRANCH"), Some("feature/x"));
        assert_eq!(env.get("ACTION_TYPE"), Some("branch"));
        assert_eq!(env.get("CUSTOM_REPO_PATH"), Some("workdir"));
        assert_eq!(env.get("DEBUG_MODE"), Some("true"));
        assert_eq!(env.get("SHOULD_DELETE"), Some("false"));
        assert!(spec
            .create_command()
            .contains("-D 'claude/env[GITHUB_BRANCH]=feature/x'"));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(LaunchSpec::new("", "p").validate().is_err());
        assert!(LaunchSpec::new("sbx", "  ").validate().is_err());

        let mut relative = LaunchSpec::new("sbx", "p");
        relative.cmd_dir = "cmd".into();
        assert!(relative.validate().is_err());

        let mut bad_agent = LaunchSpec::new("sbx", "p");
        bad_agent.agents.push(AgentFile {
            name: "../escape".into(),
            content: String::new(),
        });
        assert!(matches!(
            bad_agent.validate(),
            Err(SandboxError::Validation(_))
        ));
    }

    #[test]
    fn test_dry_run_report_lists_transfers() {
        let mut spec = full_spec();
        spec.resume = true;
        spec.custom_repo_path = Some("workdir".into());

        let report = spec.dry_run_report();
        assert!(report.contains("sandbox: cw-repo-12-0001 (resume)"));
        assert!(report.contains("repo-path: workdir"));
        assert!(report.contains("will transfer: /home/owner/cmd/prompt_new.txt"));
        assert!(report.contains("will transfer: /home/owner/cmd/github_branch.txt"));
        assert!(report.contains("agents: 2 files -> /home/owner/.claude/agents"));
    }

    #[tokio::test]
    async fn test_provision_creates_then_transfers() {
        let backend = RecordingBackend::default();
        let spec = LaunchSpec::new("sbx", "hello");

        provision(&backend, &spec).await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                "create sbx claude-code-automation env=4",
                "put /home/owner/cmd/prompt.txt",
                "put /home/owner/cmd/task_mode.txt",
                "put /home/owner/cmd/prompt_filename.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_resume_skips_create_and_stops_on_error() {
        let backend = RecordingBackend {
            fail_on: Some("/home/owner/cmd/github_repo.txt".into()),
            ..Default::default()
        };
        let mut spec = full_spec();
        spec.resume = true;

        let err = provision(&backend, &spec).await.unwrap_err();
        assert!(matches!(err, SandboxError::Transfer { .. }));
        assert_eq!(
            backend.calls(),
            vec![
                "put /home/owner/cmd/prompt_new.txt",
                "put /home/owner/cmd/external_mcp.txt",
                "put /home/owner/cmd/tool_whitelist.txt",
            ]
        );
    }
}
