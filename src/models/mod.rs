pub mod log_record;
pub mod task;

pub use log_record::{LogEntry, LogLevel, LogRecord, LogSource, SessionNotice};
pub use task::{
    FailureReason, Task, TaskError, TaskId, TaskOutcome, TaskStatus, TaskTransition, TaskUpdate,
    WorkspaceId,
};
