//! One worker pass over the durable task state.

use sandcrew_claude_sdk::SdkError;
use sandcrew_core::{SessionRecord, Task, TaskId, TaskStateManager, TaskStatus};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::executor::{run_agent_stream, AgentRunRequest};

/// Summary of a worker pass.
#[derive(Debug, Default)]
pub struct WorkerReport {
    /// Task that was current during the pass.
    pub task_id: Option<TaskId>,
    /// Session linked to that task, if any.
    pub session_id: Option<String>,
    /// Whether the agent process was started.
    pub agent_ran: bool,
    /// Agent failure, already absorbed into the task state.
    pub agent_error: Option<String>,
}

/// Runs a single pass: pick up work, run the agent, persist.
pub struct WorkerLoop {
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<WorkerReport, WorkerError> {
        let config = &self.config;

        if let Some(parent) = config.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut state = TaskStateManager::load(&config.state_path)?;
        info!(
            path = %config.state_path.display(),
            queued = state.state().queue.len(),
            has_current = state.current().is_some(),
            "Loaded task state"
        );

        if state.current().is_none() {
            if let Some(task) = state.start_next()? {
                info!(task_id = %task.id, "Started queued task");
            }
        }

        match SessionRecord::load(&config.session_path) {
            Ok(Some(record)) => {
                if state.link_session_to_current(&record.session_id) {
                    info!(session_id = %record.session_id, "Linked existing session");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable session record"),
        }

        let has_prompt = !config.prompt.trim().is_empty();
        if state.current().is_none() && has_prompt {
            let id = config
                .task_id
                .as_deref()
                .filter(|id| !state.state().contains(id))
                .map(TaskId::new)
                .unwrap_or_else(TaskId::generate);
            let task = Task::new(id)
                .with_data("promptFile", config.prompt_file.as_str())
                .with_data("taskMode", config.task_mode.as_str());
            info!(task_id = %task.id, mode = %config.task_mode, "Created task from prompt");
            state.enqueue(task)?;
            state.start_next()?;
        }

        let mut report = WorkerReport {
            task_id: state.current().map(|t| t.id.clone()),
            ..Default::default()
        };

        match (&report.task_id, has_prompt) {
            (Some(task_id), true) => {
                let task_id = task_id.clone();
                let request = self.agent_request();

                match run_agent_stream(&request, &mut state).await {
                    Ok(session_id) => {
                        report.agent_ran = true;
                        report.session_id = session_id;
                    }
                    Err(e) => {
                        report.agent_ran = matches!(
                            e,
                            WorkerError::Agent(SdkError::ProcessExit { .. })
                                | WorkerError::Agent(SdkError::StreamRead(_))
                        );
                        if report.agent_ran {
                            warn!(task_id = %task_id, error = %e, "Agent run failed");
                        } else {
                            warn!(task_id = %task_id, error = %e, "Agent could not run, completing task");
                        }
                        // No-op when the executor already completed it.
                        state.complete_current(TaskStatus::Done)?;
                        report.agent_error = Some(e.to_string());
                    }
                }

                if let Some(task) = state.state().find(task_id.as_str()) {
                    if task.session_id.is_some() {
                        report.session_id = task.session_id.clone();
                    }
                }
            }
            (Some(task_id), false) => {
                debug!(task_id = %task_id, "No prompt, leaving task current");
            }
            (None, _) => debug!("Nothing to do"),
        }

        state.save()?;
        Ok(report)
    }

    fn agent_request(&self) -> AgentRunRequest {
        let config = &self.config;
        AgentRunRequest {
            claude_bin: config.claude_bin.clone(),
            home_dir: config.home_dir.clone(),
            work_dir: config.work_dir().to_path_buf(),
            session_path: config.session_path.clone(),
            prompt: config.prompt.clone(),
            debug: config.debug,
            allowed_tools: config.allowed_tools.clone(),
            disallowed_tools: Vec::new(),
            permission_mode: config.permission_mode,
        }
    }
}
