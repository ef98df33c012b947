//! Agent execution via the Claude Code SDK.
//!
//! Runs one streaming Claude session against the current task and records
//! its outcome in the task state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sandcrew_claude_sdk::{
    ClaudeExecutor, EchoHandler, PermissionMode, StreamHandler, StreamOutcome,
};
use sandcrew_core::{SessionRecord, TaskStateManager, TaskStatus};
use tracing::{info, warn};

use crate::error::WorkerError;

/// Inputs for one agent run.
#[derive(Debug, Clone)]
pub struct AgentRunRequest {
    pub claude_bin: String,
    /// Home directory; its `.mcp.json` is passed to Claude when present.
    pub home_dir: PathBuf,
    /// Directory Claude runs in.
    pub work_dir: PathBuf,
    /// Where the latest session id is written.
    pub session_path: PathBuf,
    pub prompt: String,
    /// Echo the stream to stdout.
    pub debug: bool,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
}

/// Run Claude for the current task and complete it.
///
/// Validation and launch errors return before any state change. Once the
/// process has started, the current task is completed as `done` and the state
/// saved before stream or exit failures are returned. Returns the captured
/// session id.
pub async fn run_agent_stream(
    request: &AgentRunRequest,
    state: &mut TaskStateManager,
) -> Result<Option<String>, WorkerError> {
    let handler: Arc<dyn StreamHandler> = Arc::new(EchoHandler::stdout(request.debug));
    let executor = ClaudeExecutor::new(&request.claude_bin)
        .with_home_dir(&request.home_dir)
        .with_permission_mode(request.permission_mode)
        .with_allowed_tools(request.allowed_tools.clone())
        .with_disallowed_tools(request.disallowed_tools.clone());

    let outcome = executor
        .execute(&request.work_dir, &request.prompt, handler)
        .await?;

    record_outcome(outcome, &request.session_path, state)
}

/// Persist a finished run, then surface its stream or exit failure.
fn record_outcome(
    outcome: StreamOutcome,
    session_path: &Path,
    state: &mut TaskStateManager,
) -> Result<Option<String>, WorkerError> {
    if let Some(session_id) = outcome.session_id.as_deref() {
        if let Err(e) = SessionRecord::new(session_id).save(session_path) {
            warn!(
                error = %e,
                path = %session_path.display(),
                "Failed to write session record"
            );
        }
        if state.link_session_to_current(session_id) {
            info!(session_id = %session_id, "Linked session to current task");
        }
    }

    if let Some(task) = state.complete_current(TaskStatus::Done)? {
        info!(task_id = %task.id, "Task completed");
    }
    state.save()?;

    outcome.check().map_err(WorkerError::from)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use sandcrew_claude_sdk::SdkError;
    use sandcrew_core::Task;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for `claude`.
    fn fake_claude(dir: &Path, body: &str) -> String {
        let path = dir.join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn setup(tmp: &TempDir, body: &str) -> (AgentRunRequest, TaskStateManager) {
        let home = tmp.path().to_path_buf();
        let request = AgentRunRequest {
            claude_bin: fake_claude(&home, body),
            home_dir: home.clone(),
            work_dir: home.clone(),
            session_path: home.join("session.json"),
            prompt: "do it".to_string(),
            debug: false,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            permission_mode: PermissionMode::Default,
        };
        let mut state = TaskStateManager::new(home.join("state.json"));
        state.enqueue(Task::new("t1")).unwrap();
        state.start_next().unwrap();
        (request, state)
    }

    #[tokio::test]
    async fn test_session_recorded_and_task_completed() {
        let tmp = TempDir::new().unwrap();
        let (request, mut state) = setup(
            &tmp,
            r#"echo '{"type":"system","session_id":"first"}'
echo 'plain text'
echo '{"type":"system","session_id":"abc"}'"#,
        );

        let session = run_agent_stream(&request, &mut state).await.unwrap();
        assert_eq!(session.as_deref(), Some("abc"));

        let record = SessionRecord::load(&request.session_path).unwrap().unwrap();
        assert_eq!(record.session_id, "abc");

        let saved = TaskStateManager::load(state.path()).unwrap();
        let history = &saved.state().history;
        assert!(saved.current().is_none());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Done);
        assert_eq!(history[0].session_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_completes_task() {
        let tmp = TempDir::new().unwrap();
        let (request, mut state) = setup(&tmp, "echo '{\"type\":\"result\"}'\nexit 3");

        let err = run_agent_stream(&request, &mut state).await.unwrap_err();
        assert!(matches!(err, WorkerError::Agent(SdkError::ProcessExit { code: 3 })));

        let saved = TaskStateManager::load(state.path()).unwrap();
        assert!(saved.current().is_none());
        assert_eq!(saved.state().history[0].status, TaskStatus::Done);
        assert!(!request.session_path.exists());
    }

    #[tokio::test]
    async fn test_read_error_surfaces_after_state_is_saved() {
        let tmp = TempDir::new().unwrap();
        let (request, mut state) = setup(&tmp, "exit 0");
        let outcome = StreamOutcome {
            session_id: Some("abc".to_string()),
            lines: 1,
            exit_code: Some(0),
            success: true,
            read_error: Some(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )),
        };

        let err = record_outcome(outcome, &request.session_path, &mut state).unwrap_err();
        assert!(matches!(err, WorkerError::Agent(SdkError::StreamRead(_))));

        let saved = TaskStateManager::load(state.path()).unwrap();
        assert!(saved.current().is_none());
        assert_eq!(saved.state().history[0].status, TaskStatus::Done);
        assert_eq!(saved.state().history[0].session_id.as_deref(), Some("abc"));
        let record = SessionRecord::load(&request.session_path).unwrap().unwrap();
        assert_eq!(record.session_id, "abc");
    }

    #[tokio::test]
    async fn test_validation_error_leaves_state_alone() {
        let tmp = TempDir::new().unwrap();
        let (mut request, mut state) = setup(&tmp, "exit 0");
        request.work_dir = tmp.path().join("missing");

        let err = run_agent_stream(&request, &mut state).await.unwrap_err();
        assert!(matches!(err, WorkerError::Agent(SdkError::Validation(_))));
        assert_eq!(state.current().map(|t| t.id.as_str()), Some("t1"));
        assert!(!state.path().exists());
    }

    #[tokio::test]
    async fn test_existing_session_is_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let (request, mut state) = setup(&tmp, r#"echo '{"type":"system","session_id":"new"}'"#);
        state.link_session_to_current("old");

        run_agent_stream(&request, &mut state).await.unwrap();

        // The artifact tracks the latest run; the task keeps its first session.
        let record = SessionRecord::load(&request.session_path).unwrap().unwrap();
        assert_eq!(record.session_id, "new");
        assert_eq!(state.state().history[0].session_id.as_deref(), Some("old"));
    }
}
