use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub type TaskId = String;
pub type WorkspaceId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    /// Position along the non-terminal path. Terminal states share the top rank.
    pub(crate) fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Started => 1,
            TaskStatus::Success | TaskStatus::Failure => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub reason: FailureReason,
    pub message: Option<String>,
}

/// Terminal payload. A task carries either a result or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TaskOutcome {
    Result { value: serde_json::Value },
    Error(TaskError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskTransition {
    pub status: TaskStatus,
    pub progress: u8,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: WorkspaceId,
    pub operation: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub outcome: Option<TaskOutcome>,
    pub last_updated: DateTime<Utc>,
    pub history: VecDeque<TaskTransition>,
}

impl Task {
    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Some(TaskOutcome::Result { value }) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Some(TaskOutcome::Error(err)) => Some(err),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One decoded `task.update` event. Absent optional fields leave stored values alone.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub id: TaskId,
    pub workspace_id: Option<WorkspaceId>,
    pub operation: Option<String>,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub timestamp: DateTime<Utc>,
}

impl TaskUpdate {
    pub fn new(id: impl Into<TaskId>, status: TaskStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            workspace_id: None,
            operation: None,
            status,
            progress: None,
            result: None,
            error: None,
            timestamp,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<WorkspaceId>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }
}
