use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedSample {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub frames_received: u64,
    pub events_applied: u64,
    pub malformed_total: u64,
    pub malformed_by_reason: BTreeMap<String, u64>,
    pub recent_malformed: Vec<MalformedSample>,
    pub stale_progress_rejected: u64,
    pub status_regressions_ignored: u64,
    pub ignored_after_terminal: u64,
    pub logs_evicted: u64,
    pub tasks_evicted: u64,
    pub reconnects: u64,
    /// Subscriber handlers that panicked; the event was still applied.
    pub handler_panics: u64,
    pub subscribers: usize,
}
