//! `sandcrew task`: inspect and edit a task state document.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use sandcrew_core::{CoreError, Task, TaskId, TaskStateManager, TaskStatus};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Path to the state document (defaults to $HOME/state.json)
    #[arg(long)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Create an empty state document if none exists
    Init,
    /// Print the whole state document
    Read,
    /// Print a one-line summary
    Status,
    /// Print the current task
    Current,
    /// Start the next queued task and print it
    Next,
    /// Queue a task for a prompt file and print its id
    Create {
        /// Prompt file the task refers to
        prompt_file: String,

        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Make a task current and set its status
    Update {
        /// Task id
        id: String,

        /// New status: running, done or failed
        status: String,

        /// Session to link to the task
        #[arg(long)]
        session: Option<String>,
    },
}

impl TaskArgs {
    pub fn state_path(&self) -> Result<PathBuf, CliError> {
        match &self.state {
            Some(path) => Ok(path.clone()),
            None => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join("state.json"))
                .ok_or_else(|| CliError::Validation("--state is required when HOME is unset".into())),
        }
    }
}

/// Run a task command and return what it prints.
pub fn execute(path: &Path, command: &TaskCommand) -> Result<String, CliError> {
    match command {
        TaskCommand::Init => {
            if !path.exists() {
                TaskStateManager::new(path).save()?;
            }
            Ok("ok".to_string())
        }
        TaskCommand::Read => {
            let manager = TaskStateManager::load(path)?;
            to_pretty(manager.state())
        }
        TaskCommand::Status => {
            let manager = TaskStateManager::load(path)?;
            let state = manager.state();
            Ok(format!(
                "current:{} queue:{} history:{}",
                state
                    .current
                    .as_ref()
                    .map(|t| t.id.as_str())
                    .unwrap_or("none"),
                state.queue.len(),
                state.history.len()
            ))
        }
        TaskCommand::Current => {
            let manager = TaskStateManager::load(path)?;
            to_pretty(&manager.current())
        }
        TaskCommand::Next => {
            let mut manager = TaskStateManager::load(path)?;
            let started = manager.start_next()?;
            manager.save()?;
            to_pretty(&started)
        }
        TaskCommand::Create {
            prompt_file,
            task_id,
        } => {
            let mut manager = TaskStateManager::load(path)?;
            let id = task_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(TaskId::new)
                .unwrap_or_else(TaskId::generate);
            let task = Task::new(id.clone()).with_data("promptFile", prompt_file.as_str());
            manager.enqueue(task)?;
            manager.save()?;
            Ok(id.into_inner())
        }
        TaskCommand::Update {
            id,
            status,
            session,
        } => {
            let status: TaskStatus = status.parse().map_err(CliError::Validation)?;
            let mut manager = TaskStateManager::load(path)?;
            let task = manager.promote(id)?;

            if let Some(session) = session.as_deref() {
                manager.link_session_to_current(session);
            }

            match status {
                TaskStatus::Running => {}
                TaskStatus::Done | TaskStatus::Failed => {
                    manager.complete_current(status)?;
                }
                TaskStatus::Pending => {
                    return Err(CoreError::InvalidStateTransition {
                        from: task.status,
                        to: status,
                    }
                    .into())
                }
            }
            manager.save()?;
            Ok("ok".to_string())
        }
    }
}

fn to_pretty<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError::State(CoreError::Serialization(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn run(path: &Path, command: TaskCommand) -> Result<String, CliError> {
        execute(path, &command)
    }

    fn create(path: &Path, id: &str) {
        run(
            path,
            TaskCommand::Create {
                prompt_file: "prompt.txt".into(),
                task_id: Some(id.into()),
            },
        )
        .unwrap();
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&run(path, TaskCommand::Read).unwrap()).unwrap()
    }

    #[test]
    fn test_init_does_not_clobber() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        assert_eq!(run(&path, TaskCommand::Init).unwrap(), "ok");
        assert_eq!(read(&path), json!({"current": null, "queue": [], "history": []}));

        create(&path, "a");
        run(&path, TaskCommand::Init).unwrap();
        assert_eq!(read(&path)["queue"][0]["id"], "a");
    }

    #[test]
    fn test_create_next_status() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        create(&path, "a");
        let generated = run(
            &path,
            TaskCommand::Create {
                prompt_file: "p2.txt".into(),
                task_id: None,
            },
        )
        .unwrap();
        assert!(generated.starts_with("task-"));
        assert_eq!(
            run(&path, TaskCommand::Status).unwrap(),
            "current:none queue:2 history:0"
        );

        let next: Value = serde_json::from_str(&run(&path, TaskCommand::Next).unwrap()).unwrap();
        assert_eq!(next["id"], "a");
        assert_eq!(next["status"], "running");
        assert_eq!(next["data"]["promptFile"], "prompt.txt");

        let current: Value =
            serde_json::from_str(&run(&path, TaskCommand::Current).unwrap()).unwrap();
        assert_eq!(current["id"], "a");
        assert_eq!(
            run(&path, TaskCommand::Status).unwrap(),
            "current:a queue:1 history:0"
        );
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        create(&path, "a");

        let err = run(
            &path,
            TaskCommand::Create {
                prompt_file: "prompt.txt".into(),
                task_id: Some("a".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CliError::State(CoreError::DuplicateId(_))));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_update_promotes_without_dropping_others() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        for id in ["a", "b", "c"] {
            create(&path, id);
        }

        run(
            &path,
            TaskCommand::Update {
                id: "b".into(),
                status: "done".into(),
                session: Some("s1".into()),
            },
        )
        .unwrap();

        let state = read(&path);
        assert_eq!(state["current"], Value::Null);
        assert_eq!(state["queue"][0]["id"], "a");
        assert_eq!(state["queue"][1]["id"], "c");
        assert_eq!(state["history"][0]["id"], "b");
        assert_eq!(state["history"][0]["status"], "done");
        assert_eq!(state["history"][0]["sessionId"], "s1");
    }

    #[test]
    fn test_update_running_keeps_task_current() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        create(&path, "a");

        run(
            &path,
            TaskCommand::Update {
                id: "a".into(),
                status: "RUNNING".into(),
                session: None,
            },
        )
        .unwrap();
        assert_eq!(read(&path)["current"]["id"], "a");

        // Completing the current task works through the same command.
        run(
            &path,
            TaskCommand::Update {
                id: "a".into(),
                status: "failed".into(),
                session: None,
            },
        )
        .unwrap();
        assert_eq!(read(&path)["history"][0]["status"], "failed");
    }

    #[test]
    fn test_update_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        create(&path, "a");

        let unknown = run(
            &path,
            TaskCommand::Update {
                id: "zzz".into(),
                status: "done".into(),
                session: None,
            },
        )
        .unwrap_err();
        assert!(matches!(unknown, CliError::State(CoreError::TaskNotFound(_))));

        let bad_status = run(
            &path,
            TaskCommand::Update {
                id: "a".into(),
                status: "finished".into(),
                session: None,
            },
        )
        .unwrap_err();
        assert!(matches!(bad_status, CliError::Validation(_)));

        let pending = run(
            &path,
            TaskCommand::Update {
                id: "a".into(),
                status: "pending".into(),
                session: None,
            },
        )
        .unwrap_err();
        assert_eq!(pending.exit_code(), 2);
        // Rejected updates are not persisted.
        assert_eq!(read(&path)["queue"][0]["id"], "a");
    }

    #[test]
    fn test_corrupt_state_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let err = run(&path, TaskCommand::Status).unwrap_err();
        assert!(matches!(err, CliError::State(CoreError::CorruptState { .. })));
        assert_eq!(err.exit_code(), 1);
    }
}
