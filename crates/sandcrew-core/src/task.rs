//! Task type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{TaskId, TaskStatus};

/// A Task is one unit of work tracked by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Current task status.
    #[serde(default)]
    pub status: TaskStatus,

    /// Agent session the task first attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Opaque payload carried with the task.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    /// When the task was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the task last changed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(id: impl Into<TaskId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            session_id: None,
            data: Map::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Builder method to attach a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the status and bump `updated_at`.
    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
