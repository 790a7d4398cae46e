mod types;

pub use types::{DiagnosticsSnapshot, MalformedSample};

use chrono::Utc;
use std::collections::BTreeMap;

const MAX_RECENT_MALFORMED: usize = 20;

/// Counters for everything the ingestion path drops or rejects instead of failing.
#[derive(Debug, Default)]
pub struct Diagnostics {
    frames_received: u64,
    events_applied: u64,
    malformed_by_reason: BTreeMap<String, u64>,
    recent_malformed: Vec<MalformedSample>,
    stale_progress_rejected: u64,
    status_regressions_ignored: u64,
    ignored_after_terminal: u64,
    logs_evicted: u64,
    tasks_evicted: u64,
    reconnects: u64,
    handler_panics: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self) {
        self.frames_received += 1;
    }

    pub fn record_applied(&mut self) {
        self.events_applied += 1;
    }

    pub fn record_malformed(&mut self, reason: &str, detail: impl Into<String>) {
        *self.malformed_by_reason.entry(reason.to_string()).or_insert(0) += 1;

        self.recent_malformed.push(MalformedSample {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            detail: detail.into(),
        });

        if self.recent_malformed.len() > MAX_RECENT_MALFORMED {
            self.recent_malformed.remove(0);
        }
    }

    pub fn record_stale_progress(&mut self) {
        self.stale_progress_rejected += 1;
    }

    pub fn record_status_regression(&mut self) {
        self.status_regressions_ignored += 1;
    }

    pub fn record_ignored_after_terminal(&mut self) {
        self.ignored_after_terminal += 1;
    }

    pub fn record_logs_evicted(&mut self, count: usize) {
        self.logs_evicted += count as u64;
    }

    pub fn record_tasks_evicted(&mut self, count: usize) {
        self.tasks_evicted += count as u64;
    }

    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    pub fn record_handler_panics(&mut self, count: usize) {
        self.handler_panics += count as u64;
    }

    pub fn malformed_total(&self) -> u64 {
        self.malformed_by_reason.values().sum()
    }

    pub fn snapshot(&self, subscribers: usize) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_received: self.frames_received,
            events_applied: self.events_applied,
            malformed_total: self.malformed_total(),
            malformed_by_reason: self.malformed_by_reason.clone(),
            recent_malformed: self.recent_malformed.clone(),
            stale_progress_rejected: self.stale_progress_rejected,
            status_regressions_ignored: self.status_regressions_ignored,
            ignored_after_terminal: self.ignored_after_terminal,
            logs_evicted: self.logs_evicted,
            tasks_evicted: self.tasks_evicted,
            reconnects: self.reconnects,
            handler_panics: self.handler_panics,
            subscribers,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
