use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::channel::{ConsoleEvent, Subscribers, Subscription};
use crate::config::ConsoleConfig;
use crate::logs::{FilterPatch, FilterState, LogBuffer, VisibleLine};
use crate::metrics::{Diagnostics, DiagnosticsSnapshot};
use crate::models::{LogEntry, LogLevel, Task};
use crate::tasks::TaskRegistry;

/// Everything the console knows for one session.
pub(crate) struct ConsoleState {
    pub(crate) tasks: TaskRegistry,
    pub(crate) logs: LogBuffer,
    pub(crate) diagnostics: Diagnostics,
}

impl ConsoleState {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            tasks: TaskRegistry::new(&config.tasks),
            logs: LogBuffer::new(&config.logs),
            diagnostics: Diagnostics::new(),
        }
    }

    pub(crate) fn apply(&mut self, event: &ConsoleEvent) {
        match event {
            ConsoleEvent::TaskUpdate(update) => {
                let report = self.tasks.apply(update.clone());
                if report.ignored_after_terminal {
                    self.diagnostics.record_ignored_after_terminal();
                }
                if report.stale_progress {
                    self.diagnostics.record_stale_progress();
                }
                if report.status_regression {
                    self.diagnostics.record_status_regression();
                }
                if report.evicted > 0 {
                    debug!("evicted {} finished tasks over capacity", report.evicted);
                    self.diagnostics.record_tasks_evicted(report.evicted);
                }
            }
            ConsoleEvent::LogAppend(record) => {
                let evicted = self.logs.append(record.clone());
                self.diagnostics.record_logs_evicted(evicted);
            }
            ConsoleEvent::SessionNotice(notice) => {
                let evicted = self.logs.push_notice(notice.clone());
                self.diagnostics.record_logs_evicted(evicted);
            }
        }
        self.diagnostics.record_applied();
    }
}

#[derive(Clone)]
pub(crate) struct ConsoleStore {
    inner: Arc<Mutex<ConsoleState>>,
}

impl ConsoleStore {
    pub(crate) fn new(config: &ConsoleConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConsoleState::new(config))),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Read access for presentation surfaces.
///
/// Surfaces can read tasks and logs and steer their own view (filter, pause) but cannot
/// change what was ingested; that goes through the adapter.
#[derive(Clone)]
pub struct ConsoleHandle {
    store: ConsoleStore,
    subscribers: Subscribers,
}

impl ConsoleHandle {
    pub(crate) fn new(store: ConsoleStore, subscribers: Subscribers) -> Self {
        Self { store, subscribers }
    }

    /// Receive every event after it has been applied. Dropping the guard unsubscribes.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsoleEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.store.lock().tasks.tasks().cloned().collect()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.store.lock().tasks.get(id).cloned()
    }

    pub fn tasks_in_workspace(&self, workspace_id: &str) -> Vec<Task> {
        self.store
            .lock()
            .tasks
            .tasks_in_workspace(workspace_id)
            .cloned()
            .collect()
    }

    pub fn active_task_count(&self) -> usize {
        self.store.lock().tasks.active_count()
    }

    pub fn visible_logs(&self) -> Arc<[VisibleLine]> {
        self.store.lock().logs.visible()
    }

    pub fn filter(&self) -> FilterState {
        self.store.lock().logs.filter()
    }

    pub fn set_filter(&self, patch: FilterPatch) {
        self.store.lock().logs.set_filter(patch);
    }

    pub fn pause_logs(&self) {
        self.store.lock().logs.pause();
    }

    pub fn resume_logs(&self) {
        self.store.lock().logs.resume();
    }

    pub fn pending_while_paused(&self) -> usize {
        self.store.lock().logs.pending_while_paused()
    }

    pub fn level_counts(&self) -> BTreeMap<LogLevel, usize> {
        self.store.lock().logs.level_counts()
    }

    pub fn log_snapshot(&self) -> Vec<LogEntry> {
        self.store.lock().logs.snapshot()
    }

    pub fn log_len(&self) -> usize {
        self.store.lock().logs.len()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let subscribers = self.subscribers.len();
        self.store.lock().diagnostics.snapshot(subscribers)
    }
}
