//! `sandcrew launch`: create or resume a sandbox and hand it a task.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Args, ValueEnum};
use tokio::process::Command;
use tracing::{info, warn};

use sandcrew_sandbox::{
    provision, AgentFile, LaunchSpec, SandboxBackend, Target, DEFAULT_CMD_DIR, DEFAULT_TEMPLATE,
    WORKER_START_COMMAND,
};

use crate::error::CliError;

/// Upper bound for each GitHub existence check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a generated sandbox name.
const MAX_NAME_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn as_bool(self) -> bool {
        self == YesNo::Yes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionType {
    Branch,
    Pr,
    Issue,
}

/// Create (or resume) a sandbox and configure its worker
#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Worker command directory inside the sandbox
    #[arg(long, default_value = DEFAULT_CMD_DIR)]
    pub cmd_dir: String,

    /// GitHub repository (owner/name)
    #[arg(long)]
    pub github_repo: Option<String>,

    /// What the agent works on
    #[arg(long, value_enum, default_value_t = ActionType::Branch, ignore_case = true)]
    pub action_type: ActionType,

    /// Branch (for action type branch)
    #[arg(long)]
    pub github_branch: Option<String>,

    /// Pull request number (for action type pr)
    #[arg(long)]
    pub pr_number: Option<String>,

    /// Issue number (for action type issue)
    #[arg(long)]
    pub issue_number: Option<String>,

    /// Prompt string or file path
    #[arg(short, long)]
    pub prompt: String,

    /// Sandbox pool
    #[arg(long)]
    pub pool: Option<String>,

    /// GitHub token passed to the sandbox
    #[arg(long)]
    pub github_token: Option<String>,

    /// External MCP config, JSON string or file path
    #[arg(long)]
    pub mcp_config: Option<String>,

    /// Directory of agent .md files
    #[arg(long)]
    pub agents_dir: Option<PathBuf>,

    /// Tool whitelist, JSON string or file path
    #[arg(short = 't', long)]
    pub tools: Option<String>,

    /// Sandbox template
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    pub template: String,

    /// Delete the sandbox when the task is done
    #[arg(short = 'd', long, value_enum, default_value_t = YesNo::Yes, ignore_case = true)]
    pub delete_when_done: YesNo,

    /// Sandbox name (generated when omitted)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Resume an existing sandbox instead of creating one
    #[arg(long, value_name = "SANDBOX")]
    pub resume: Option<String>,

    /// Task id for the worker
    #[arg(long)]
    pub task_id: Option<String>,

    /// Run the worker right after provisioning
    #[arg(long, value_enum, default_value_t = YesNo::No, ignore_case = true)]
    pub debug: YesNo,

    /// Repository path inside the sandbox
    #[arg(long)]
    pub repo_path: Option<String>,

    /// Validate and print the plan without touching any sandbox
    #[arg(long)]
    pub dry_run: bool,
}

/// Checks that GitHub resources exist before a sandbox is created.
#[async_trait]
pub trait GitHubProbe: Send + Sync {
    async fn verify(&self, repo: &str, target: &Target, token: Option<&str>)
        -> Result<(), CliError>;
}

/// Probe backed by the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhProbe {
    gh: String,
    timeout: Duration,
}

impl Default for GhProbe {
    fn default() -> Self {
        Self {
            gh: "gh".to_string(),
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl GhProbe {
    #[cfg(test)]
    fn new(gh: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gh: gh.into(),
            timeout,
        }
    }
}

#[async_trait]
impl GitHubProbe for GhProbe {
    async fn verify(
        &self,
        repo: &str,
        target: &Target,
        token: Option<&str>,
    ) -> Result<(), CliError> {
        let (args, missing) = match target {
            Target::Pr(n) => (
                vec!["pr".to_string(), "view".into(), n.clone(), "--repo".into(), repo.into()],
                format!("pull request #{n} does not exist in {repo}"),
            ),
            Target::Issue(n) => (
                vec![
                    "issue".to_string(),
                    "view".into(),
                    n.clone(),
                    "--repo".into(),
                    repo.into(),
                    "--json".into(),
                    "number".into(),
                ],
                format!("issue #{n} does not exist in {repo}"),
            ),
            Target::Branch(b) => (
                vec![
                    "api".to_string(),
                    format!("repos/{repo}/branches/{b}"),
                    "--jq".into(),
                    ".name".into(),
                ],
                format!("branch '{b}' does not exist in {repo}"),
            ),
        };

        let mut cmd = Command::new(&self.gh);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(token) = token {
            cmd.env("GITHUB_TOKEN", token);
        }

        match tokio::time::timeout(self.timeout, cmd.status()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(_)) => Err(CliError::Validation(missing)),
            Ok(Err(e)) => {
                warn!(error = %e, "Could not run gh, skipping GitHub check");
                Ok(())
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "GitHub check timed out, skipping");
                Ok(())
            }
        }
    }
}

/// What a launch did.
#[derive(Debug, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Plan printed, nothing executed.
    DryRun(String),
    Provisioned { name: String, resumed: bool },
}

/// Validate arguments, build the launch plan and apply it.
pub async fn run(
    args: &LaunchArgs,
    backend: &dyn SandboxBackend,
    probe: &dyn GitHubProbe,
) -> Result<LaunchOutcome, CliError> {
    let spec = build_spec(args, chrono::Utc::now().timestamp_millis())?;

    if !spec.resume {
        if let (Some(repo), Some(target)) = (spec.github_repo.as_deref(), spec.target()) {
            probe
                .verify(repo, &target, spec.github_token.as_deref())
                .await?;
        }
    }

    if args.dry_run {
        let mut plan = String::new();
        if !spec.resume {
            plan.push_str("cs sandbox create (preview):\n");
            plan.push_str(&spec.create_command());
            plan.push('\n');
        }
        plan.push_str(&spec.dry_run_report());
        return Ok(LaunchOutcome::DryRun(plan));
    }

    provision(backend, &spec).await?;
    info!(
        sandbox = %spec.name,
        resumed = spec.resume,
        "Sandbox configured"
    );

    if spec.debug {
        info!(sandbox = %spec.name, "Debug mode enabled, running worker");
        backend.exec(&spec.name, WORKER_START_COMMAND).await?;
        info!(sandbox = %spec.name, "Worker finished");
    }

    Ok(LaunchOutcome::Provisioned {
        name: spec.name,
        resumed: spec.resume,
    })
}

/// Validate the arguments and resolve every input into a [`LaunchSpec`].
pub fn build_spec(args: &LaunchArgs, now_millis: i64) -> Result<LaunchSpec, CliError> {
    if args.prompt.trim().is_empty() {
        return Err(CliError::Validation("prompt (-p) is required".into()));
    }

    let repo = non_empty(&args.github_repo);
    let branch = non_empty(&args.github_branch);
    let pr = non_empty(&args.pr_number);
    let issue = non_empty(&args.issue_number);

    if repo.is_some() || branch.is_some() || pr.is_some() || issue.is_some() {
        validate_github_context(
            repo.as_deref(),
            args.action_type,
            branch.as_deref(),
            pr.as_deref(),
            issue.as_deref(),
        )?;
    }

    let prompt = read_file_or_string(&args.prompt)
        .map_err(|e| CliError::io(format!("prompt {}", args.prompt), e))?;
    let mcp = read_optional_json("mcp-config", args.mcp_config.as_deref())?;
    let tools = read_optional_json("tools", args.tools.as_deref())?;
    let agents = match &args.agents_dir {
        Some(dir) => list_agent_files(dir)
            .map_err(|e| CliError::io(format!("agents-dir {}", dir.display()), e))?,
        None => Vec::new(),
    };

    let resume = non_empty(&args.resume);
    let name = match (&resume, non_empty(&args.name)) {
        (Some(existing), _) => existing.clone(),
        (None, Some(name)) => name,
        (None, None) => {
            let item = pr.as_deref().or(issue.as_deref()).unwrap_or("dev");
            generate_sandbox_name(repo.as_deref(), item, now_millis)
        }
    };

    let mut spec = LaunchSpec::new(name, prompt);
    spec.template = args.template.clone();
    spec.pool = non_empty(&args.pool);
    spec.resume = resume.is_some();
    spec.delete_when_done = args.delete_when_done.as_bool();
    spec.debug = args.debug.as_bool();
    spec.cmd_dir = args.cmd_dir.clone();
    spec.custom_repo_path = non_empty(&args.repo_path);
    spec.github_repo = repo;
    spec.github_token = non_empty(&args.github_token);
    spec.github_branch = branch;
    spec.pr_number = pr;
    spec.issue_number = issue;
    spec.external_mcp = mcp;
    spec.tool_whitelist = tools;
    spec.task_id = non_empty(&args.task_id);
    spec.agents = agents;

    spec.validate()?;
    Ok(spec)
}

fn validate_github_context(
    repo: Option<&str>,
    action: ActionType,
    branch: Option<&str>,
    pr: Option<&str>,
    issue: Option<&str>,
) -> Result<(), CliError> {
    if repo.is_none() {
        return Err(CliError::Validation("github-repo is required".into()));
    }
    let (value, message) = match action {
        ActionType::Branch => (branch, "branch action requires --github-branch"),
        ActionType::Pr => (pr, "pr action requires --pr-number"),
        ActionType::Issue => (issue, "issue action requires --issue-number"),
    };
    if value.is_none() {
        return Err(CliError::Validation(message.into()));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Treat `value` as a path when it looks like one, otherwise as literal text.
pub fn read_file_or_string(value: &str) -> std::io::Result<String> {
    let value = value.trim();
    let looks_like_path = value.contains('/')
        || value.contains('\\')
        || [".txt", ".json", ".md"].iter().any(|ext| value.ends_with(ext));
    if looks_like_path {
        Ok(std::fs::read_to_string(value)?.trim().to_string())
    } else {
        Ok(value.to_string())
    }
}

/// Resolve an optional JSON input and check that it parses.
fn read_optional_json(flag: &str, value: Option<&str>) -> Result<Option<String>, CliError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let content = read_file_or_string(value).map_err(|e| CliError::io(flag, e))?;
    serde_json::from_str::<serde_json::Value>(&content)
        .map_err(|e| CliError::Validation(format!("{flag}: invalid JSON: {e}")))?;
    Ok(Some(content))
}

/// Collect `*.md` files under `dir` (recursively), sorted by name.
pub fn list_agent_files(dir: &Path) -> std::io::Result<Vec<AgentFile>> {
    let mut files = Vec::new();
    collect_agents(dir, &mut files)?;
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn collect_agents(dir: &Path, out: &mut Vec<AgentFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_agents(&path, out)?;
            continue;
        }
        let is_md = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        if !is_md {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            out.push(AgentFile {
                name: stem.to_string_lossy().into_owned(),
                content: std::fs::read_to_string(&path)?,
            });
        }
    }
    Ok(())
}

/// `cw-<repo>-<item>-<last 4 digits of now_millis>`, at most 20 chars.
pub fn generate_sandbox_name(repo: Option<&str>, item: &str, now_millis: i64) -> String {
    let repo_name = repo
        .and_then(|r| match r.split('/').collect::<Vec<_>>().as_slice() {
            [_, name] if !name.is_empty() => Some(*name),
            _ => None,
        })
        .unwrap_or("sandbox");
    let repo_name = sanitize_name(repo_name);

    let millis = now_millis.to_string();
    let short = &millis[millis.len().saturating_sub(4)..];
    let item = if item.is_empty() { "dev" } else { item };

    format!("cw-{repo_name}-{item}-{short}")
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}

/// Lowercase, restrict to `[a-z0-9-]`, start with a letter, end with an
/// alphanumeric, and keep at most 8 chars.
pub fn sanitize_name(name: &str) -> String {
    let mut chars: Vec<char> = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if chars.is_empty() {
        return "sandbox".to_string();
    }
    if !chars[0].is_ascii_lowercase() {
        chars[0] = 'a';
    }
    let last = chars.len() - 1;
    if !chars[last].is_ascii_alphanumeric() {
        chars[last] = '9';
    }
    chars.truncate(8);
    chars.into_iter().collect()
}
