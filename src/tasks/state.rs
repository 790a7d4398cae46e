use std::collections::VecDeque;

use serde_json::Value;

use crate::models::{
    FailureReason, Task, TaskError, TaskOutcome, TaskStatus, TaskTransition, TaskUpdate,
};

const MAX_PROGRESS: u8 = 100;

/// What applying one update did to the stored task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: bool,
    /// A non-terminal update arrived for a task that already finished.
    pub ignored_after_terminal: bool,
    pub stale_progress: bool,
    pub status_regression: bool,
    pub evicted: usize,
}

impl ApplyReport {
    pub fn applied(&self) -> bool {
        !self.ignored_after_terminal
    }
}

pub(crate) fn create_task(update: TaskUpdate, cancel_requested: bool, history_len: usize) -> Task {
    let mut task = Task {
        id: update.id.clone(),
        workspace_id: update.workspace_id.clone().unwrap_or_default(),
        operation: None,
        status: TaskStatus::Pending,
        progress: 0,
        outcome: None,
        last_updated: update.timestamp,
        history: VecDeque::new(),
    };
    // A fresh task has nothing to regress from, so every field lands.
    apply_update(&mut task, update, cancel_requested, history_len);
    task
}

/// Apply `update` in place. Only fields present on the update overwrite stored values.
///
/// Terminal updates always win, even against a terminal task: the latest terminal event
/// is treated as authoritative. Non-terminal updates never move status backwards along
/// PENDING -> STARTED and never lower progress.
pub(crate) fn apply_update(
    task: &mut Task,
    update: TaskUpdate,
    cancel_requested: bool,
    history_len: usize,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    if task.status.is_terminal() && !update.status.is_terminal() {
        report.ignored_after_terminal = true;
        return report;
    }

    if update.status.is_terminal() {
        task.status = update.status;
        task.outcome = Some(terminal_outcome(&update, cancel_requested));
        task.progress = match (update.progress, update.status) {
            (Some(progress), _) => progress.min(MAX_PROGRESS),
            (None, TaskStatus::Success) => MAX_PROGRESS,
            (None, _) => task.progress,
        };
    } else {
        if update.status.rank() < task.status.rank() {
            report.status_regression = true;
        } else {
            task.status = update.status;
        }

        if let Some(progress) = update.progress {
            let progress = progress.min(MAX_PROGRESS);
            if progress < task.progress {
                report.stale_progress = true;
            } else {
                task.progress = progress;
            }
        }
    }

    if let Some(workspace_id) = update.workspace_id {
        task.workspace_id = workspace_id;
    }
    if let Some(operation) = update.operation {
        task.operation = Some(operation);
    }
    task.last_updated = update.timestamp;

    task.history.push_back(TaskTransition {
        status: task.status,
        progress: task.progress,
        at: update.timestamp,
    });
    while task.history.len() > history_len {
        task.history.pop_front();
    }

    report
}

fn terminal_outcome(update: &TaskUpdate, cancel_requested: bool) -> TaskOutcome {
    match update.status {
        TaskStatus::Success => TaskOutcome::Result {
            value: update.result.clone().unwrap_or(Value::Null),
        },
        _ => {
            let mut error = update.error.clone().unwrap_or(TaskError {
                reason: FailureReason::Error,
                message: None,
            });
            if cancel_requested {
                error.reason = FailureReason::Cancelled;
            }
            TaskOutcome::Error(error)
        }
    }
}
