use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{
    FailureReason, LogLevel, LogRecord, LogSource, SessionNotice, TaskError, TaskStatus,
    TaskUpdate,
};

/// A decoded inbound event, in the order the channel delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    TaskUpdate(TaskUpdate),
    LogAppend(LogRecord),
    SessionNotice(SessionNotice),
}

impl ConsoleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleEvent::TaskUpdate(_) => "task.update",
            ConsoleEvent::LogAppend(_) => "log.append",
            ConsoleEvent::SessionNotice(_) => "session.notice",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload does not match '{kind}': {detail}")]
    InvalidPayload { kind: &'static str, detail: String },
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unknown task status '{0}'")]
    UnknownStatus(String),
    #[error("unknown log source '{0}'")]
    UnknownSource(String),
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
    #[error("unparseable timestamp '{0}'")]
    BadTimestamp(String),
}

impl DecodeError {
    /// Stable key for diagnostic counters.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::InvalidPayload { .. } => "invalid_payload",
            DecodeError::UnknownKind(_) => "unknown_kind",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::UnknownStatus(_) => "unknown_status",
            DecodeError::UnknownSource(_) => "unknown_source",
            DecodeError::UnknownLevel(_) => "unknown_level",
            DecodeError::BadTimestamp(_) => "bad_timestamp",
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskUpdatePayload {
    #[serde(alias = "task_id", alias = "taskId")]
    id: Option<String>,
    #[serde(alias = "workspace_id")]
    workspace_id: Option<String>,
    operation: Option<String>,
    status: Option<String>,
    progress: Option<f64>,
    result: Option<Value>,
    error: Option<Value>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct LogAppendPayload {
    id: Option<u64>,
    source: Option<String>,
    level: Option<String>,
    message: Option<String>,
    raw: Option<String>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct NoticePayload {
    message: Option<String>,
    timestamp: Option<String>,
}

/// Decode one text frame. `now` stands in for frames that carry no timestamp.
pub fn decode_frame(text: &str, now: DateTime<Utc>) -> Result<ConsoleEvent, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
    let kind = envelope.kind.ok_or(DecodeError::MissingField("type"))?;

    match kind.as_str() {
        "task.update" => {
            let payload: TaskUpdatePayload = payload(envelope.payload, "task.update")?;
            decode_task_update(payload, now).map(ConsoleEvent::TaskUpdate)
        }
        "log.append" => {
            let payload: LogAppendPayload = payload(envelope.payload, "log.append")?;
            decode_log(payload, now).map(ConsoleEvent::LogAppend)
        }
        "session.notice" => {
            let payload: NoticePayload = payload(envelope.payload, "session.notice")?;
            Ok(ConsoleEvent::SessionNotice(SessionNotice {
                message: payload.message.ok_or(DecodeError::MissingField("message"))?,
                timestamp: timestamp(payload.timestamp, now)?,
            }))
        }
        _ => Err(DecodeError::UnknownKind(kind)),
    }
}

fn payload<T: for<'de> Deserialize<'de>>(value: Value, kind: &'static str) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|err| DecodeError::InvalidPayload {
        kind,
        detail: err.to_string(),
    })
}

fn decode_task_update(
    payload: TaskUpdatePayload,
    now: DateTime<Utc>,
) -> Result<TaskUpdate, DecodeError> {
    let id = payload
        .id
        .filter(|id| !id.is_empty())
        .ok_or(DecodeError::MissingField("id"))?;
    let workspace_id = payload
        .workspace_id
        .filter(|workspace| !workspace.is_empty())
        .ok_or(DecodeError::MissingField("workspaceId"))?;
    let raw_status = payload.status.ok_or(DecodeError::MissingField("status"))?;
    let (status, cancelled) = parse_status(&raw_status)?;

    let error = match status {
        TaskStatus::Failure => Some(TaskError {
            reason: if cancelled {
                FailureReason::Cancelled
            } else {
                FailureReason::Error
            },
            message: payload.error.as_ref().and_then(error_message),
        }),
        _ => None,
    };

    Ok(TaskUpdate {
        id,
        workspace_id: Some(workspace_id),
        operation: payload.operation,
        status,
        progress: payload.progress.map(|p| p.round().clamp(0.0, 100.0) as u8),
        result: match status {
            TaskStatus::Success => payload.result,
            _ => None,
        },
        error,
        timestamp: timestamp(payload.timestamp, now)?,
    })
}

/// Map job-runner state names onto the four console states. The flag marks revocations.
fn parse_status(raw: &str) -> Result<(TaskStatus, bool), DecodeError> {
    match raw.to_ascii_uppercase().as_str() {
        "PENDING" | "RECEIVED" => Ok((TaskStatus::Pending, false)),
        "STARTED" | "PROGRESS" | "RETRY" => Ok((TaskStatus::Started, false)),
        "SUCCESS" => Ok((TaskStatus::Success, false)),
        "FAILURE" => Ok((TaskStatus::Failure, false)),
        "REVOKED" | "CANCELLED" => Ok((TaskStatus::Failure, true)),
        _ => Err(DecodeError::UnknownStatus(raw.to_string())),
    }
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => fields
            .get("message")
            .or_else(|| fields.get("exc_message"))
            .map(|message| match message {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .or_else(|| Some(error.to_string())),
        other => Some(other.to_string()),
    }
}

fn decode_log(payload: LogAppendPayload, now: DateTime<Utc>) -> Result<LogRecord, DecodeError> {
    let id = payload.id.ok_or(DecodeError::MissingField("id"))?;
    let raw_source = payload.source.ok_or(DecodeError::MissingField("source"))?;
    let source: LogSource = raw_source
        .parse()
        .map_err(|_| DecodeError::UnknownSource(raw_source.clone()))?;
    let raw_level = payload.level.ok_or(DecodeError::MissingField("level"))?;
    let level: LogLevel = raw_level
        .parse()
        .map_err(|_| DecodeError::UnknownLevel(raw_level.clone()))?;
    let message = payload
        .message
        .or_else(|| payload.raw.clone())
        .ok_or(DecodeError::MissingField("message"))?;

    Ok(LogRecord {
        id,
        source,
        level,
        timestamp: timestamp(payload.timestamp, now)?,
        message,
        raw: payload.raw,
    })
}

fn timestamp(raw: Option<String>, now: DateTime<Utc>) -> Result<DateTime<Utc>, DecodeError> {
    match raw {
        None => Ok(now),
        Some(value) => DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| DecodeError::BadTimestamp(value)),
    }
}

/// First frame sent after every successful connect.
pub fn subscribe_frame(session_id: &str, workspace_id: Option<&str>) -> String {
    json!({
        "type": "subscribe",
        "payload": {
            "session_id": session_id,
            "workspace_id": workspace_id,
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn decodes_task_update_with_job_runner_vocabulary() {
        let frame = r#"{"type":"task.update","payload":{"task_id":"t1","workspace_id":"ws","status":"progress","progress":41.6,"timestamp":"2024-05-01T12:00:05Z"}}"#;
        let ConsoleEvent::TaskUpdate(update) = decode_frame(frame, now()).unwrap() else {
            panic!("expected task update");
        };
        assert_eq!(update.id, "t1");
        assert_eq!(update.workspace_id.as_deref(), Some("ws"));
        assert_eq!(update.status, TaskStatus::Started);
        assert_eq!(update.progress, Some(42));
        assert_eq!(update.timestamp, now() + chrono::Duration::seconds(5));
    }

    #[test]
    fn revoked_becomes_cancelled_failure() {
        let frame = r#"{"type":"task.update","payload":{"id":"t1","workspaceId":"ws","status":"REVOKED","error":{"exc_message":"terminated by user"}}}"#;
        let ConsoleEvent::TaskUpdate(update) = decode_frame(frame, now()).unwrap() else {
            panic!("expected task update");
        };
        assert_eq!(update.status, TaskStatus::Failure);
        let error = update.error.unwrap();
        assert_eq!(error.reason, FailureReason::Cancelled);
        assert_eq!(error.message.as_deref(), Some("terminated by user"));
        assert_eq!(update.timestamp, now());
    }

    #[test]
    fn malformed_task_updates_are_classified() {
        let cases = [
            (r#"{"type":"task.update","payload":{"workspaceId":"w","status":"STARTED"}}"#, "missing_field"),
            (r#"{"type":"task.update","payload":{"id":"","workspaceId":"w","status":"STARTED"}}"#, "missing_field"),
            (r#"{"type":"task.update","payload":{"id":"x","status":"STARTED"}}"#, "missing_field"),
            (r#"{"type":"task.update","payload":{"id":"x","workspace_id":"","status":"STARTED"}}"#, "missing_field"),
            (r#"{"type":"task.update","payload":{"id":"t","workspaceId":"w","status":"EXPLODED"}}"#, "unknown_status"),
            (r#"{"type":"task.update","payload":{"id":"t","workspaceId":"w","status":"STARTED","progress":"lots"}}"#, "invalid_payload"),
            (r#"{"type":"task.update","payload":{"id":"t","workspaceId":"w","status":"STARTED","timestamp":"yesterday"}}"#, "bad_timestamp"),
            (r#"{"type":"scan.magic","payload":{}}"#, "unknown_kind"),
            (r#"{"payload":{}}"#, "missing_field"),
            ("not json", "invalid_json"),
        ];
        for (frame, reason) in cases {
            let err = decode_frame(frame, now()).unwrap_err();
            assert_eq!(err.reason(), reason, "frame {frame}");
        }

        let no_workspace = r#"{"type":"task.update","payload":{"id":"x","status":"STARTED"}}"#;
        assert_eq!(
            decode_frame(no_workspace, now()).unwrap_err(),
            DecodeError::MissingField("workspaceId")
        );
    }

    #[test]
    fn decodes_log_append() {
        let frame = r#"{"type":"log.append","payload":{"id":7,"source":"celery","level":"warn","raw":"\u001b[33mslow\u001b[0m"}}"#;
        let ConsoleEvent::LogAppend(record) = decode_frame(frame, now()).unwrap() else {
            panic!("expected log record");
        };
        assert_eq!(record.id, 7);
        assert_eq!(record.source, LogSource::JobRunner);
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.message, record.raw.clone().unwrap());
    }

    #[test]
    fn log_with_unknown_source_is_rejected() {
        let frame = r#"{"type":"log.append","payload":{"id":1,"source":"metasploit","level":"INFO","message":"x"}}"#;
        assert_eq!(
            decode_frame(frame, now()).unwrap_err(),
            DecodeError::UnknownSource("metasploit".into())
        );
    }

    #[test]
    fn decodes_session_notice() {
        let frame = r#"{"type":"session.notice","payload":{"message":"worker restarted"}}"#;
        assert_eq!(
            decode_frame(frame, now()).unwrap(),
            ConsoleEvent::SessionNotice(SessionNotice {
                message: "worker restarted".into(),
                timestamp: now(),
            })
        );
    }

    #[test]
    fn subscribe_frame_carries_scope() {
        let frame: Value = serde_json::from_str(&subscribe_frame("s-1", Some("ws-9"))).unwrap();
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["payload"]["workspace_id"], "ws-9");
    }
}
