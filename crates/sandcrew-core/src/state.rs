//! Durable queue/current/history state machine.
//!
//! The state document is loaded once per process, mutated in memory and
//! written back with [`TaskStateManager::save`] after each transition. Writes
//! are atomic, so a crash loses at most the transition in flight.
//!
//! A task lives in exactly one region at a time:
//!
//! ```text
//! enqueue -> queue --start_next/promote--> current --complete_current--> history
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::fs::write_atomic;
use crate::{Task, TaskStatus};

/// The persisted state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// The single task presently running, if any.
    #[serde(default)]
    pub current: Option<Task>,

    /// Pending tasks in insertion order.
    #[serde(default)]
    pub queue: Vec<Task>,

    /// Completed tasks, append-only.
    #[serde(default)]
    pub history: Vec<Task>,
}

impl State {
    /// Find a task by id in any region.
    pub fn find(&self, id: &str) -> Option<&Task> {
        self.current
            .iter()
            .chain(self.queue.iter())
            .chain(self.history.iter())
            .find(|t| t.id == id)
    }

    /// Returns true if any region holds a task with this id.
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }
}

/// Owns the state document and enforces its invariants.
#[derive(Debug)]
pub struct TaskStateManager {
    path: PathBuf,
    state: State,
}

impl TaskStateManager {
    /// Create a manager with an empty state bound to `path`, without reading it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: State::default(),
        }
    }

    /// Load the state document at `path`.
    ///
    /// A missing or empty file yields an empty state. Malformed content fails
    /// with [`CoreError::CorruptState`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state document, starting empty");
                return Ok(Self::new(path));
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(path));
        }

        let state: State =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::CorruptState {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            path = %path.display(),
            has_current = state.current.is_some(),
            queued = state.queue.len(),
            history = state.history.len(),
            "Loaded state document"
        );

        Ok(Self { path, state })
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the full document atomically.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        json.push(b'\n');
        write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), "Saved state document");
        Ok(())
    }

    /// Read-only view of the state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The current task, if any.
    pub fn current(&self) -> Option<&Task> {
        self.state.current.as_ref()
    }

    /// Append a task to the tail of the queue.
    ///
    /// Fails with [`CoreError::DuplicateId`] if the id is already used in any region.
    pub fn enqueue(&mut self, mut task: Task) -> Result<()> {
        if self.state.contains(task.id.as_str()) {
            return Err(CoreError::DuplicateId(task.id.into_inner()));
        }

        if task.status != TaskStatus::Pending {
            task.set_status(TaskStatus::Pending);
        }

        info!(task_id = %task.id, queued = self.state.queue.len() + 1, "Task enqueued");
        self.state.queue.push(task);
        Ok(())
    }

    /// Promote the head of the queue to current.
    ///
    /// Returns `Ok(None)` when the queue is empty. Fails with
    /// [`CoreError::TaskInProgress`] if a task is already current.
    pub fn start_next(&mut self) -> Result<Option<Task>> {
        self.ensure_idle()?;

        if self.state.queue.is_empty() {
            return Ok(None);
        }

        let task = self.state.queue.remove(0);
        Ok(Some(self.make_current(task)))
    }

    /// Promote the queued task with the given id, leaving every other queued
    /// task where it is.
    ///
    /// If the task is already current it is returned unchanged.
    pub fn promote(&mut self, id: &str) -> Result<Task> {
        if let Some(current) = &self.state.current {
            if current.id == id {
                return Ok(current.clone());
            }
        }
        self.ensure_idle()?;

        let index = self
            .state
            .queue
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;

        let task = self.state.queue.remove(index);
        Ok(self.make_current(task))
    }

    /// Move the current task to history with a terminal status.
    ///
    /// No-op returning `Ok(None)` when there is no current task.
    pub fn complete_current(&mut self, status: TaskStatus) -> Result<Option<Task>> {
        let Some(mut task) = self.state.current.take() else {
            debug!(status = %status, "No current task to complete");
            return Ok(None);
        };

        if !status.is_terminal() {
            let from = task.status;
            self.state.current = Some(task);
            return Err(CoreError::InvalidStateTransition { from, to: status });
        }

        task.set_status(status);
        info!(task_id = %task.id, status = %status, "Task completed");
        self.state.history.push(task.clone());
        Ok(Some(task))
    }

    /// Attach a session id to the current task unless one is already linked.
    ///
    /// Returns true when the link was made.
    pub fn link_session_to_current(&mut self, session_id: &str) -> bool {
        if session_id.is_empty() {
            return false;
        }

        match self.state.current.as_mut() {
            Some(task) if task.session_id.is_none() => {
                info!(task_id = %task.id, session_id = %session_id, "Linked session to task");
                task.session_id = Some(session_id.to_string());
                true
            }
            Some(task) => {
                debug!(
                    task_id = %task.id,
                    existing = task.session_id.as_deref().unwrap_or_default(),
                    ignored = %session_id,
                    "Task already linked to a session"
                );
                false
            }
            None => false,
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.state.current {
            Some(current) => Err(CoreError::TaskInProgress(current.id.to_string())),
            None => Ok(()),
        }
    }

    fn make_current(&mut self, mut task: Task) -> Task {
        task.set_status(TaskStatus::Running);
        info!(task_id = %task.id, remaining = self.state.queue.len(), "Task started");
        self.state.current = Some(task.clone());
        task
    }
}
