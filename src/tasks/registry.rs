use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use crate::config::TaskSettings;
use crate::models::{Task, TaskId, TaskUpdate};

use super::state::{apply_update, create_task, ApplyReport};

#[derive(Debug)]
struct Slot {
    /// Creation sequence number; keys `order` and `finished`.
    seq: u64,
    task: Task,
}

/// Keyed store of every tracked task for one session.
///
/// Lookup and update are O(1) by id. Iteration walks creation order, newest first.
/// Removal and eviction are O(log n).
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Slot>,
    order: BTreeMap<u64, TaskId>,
    /// Terminal tasks only, oldest-created first.
    finished: BTreeMap<u64, TaskId>,
    cancel_requested: HashSet<TaskId>,
    next_seq: u64,
    capacity: usize,
    history_len: usize,
}

impl TaskRegistry {
    pub fn new(settings: &TaskSettings) -> Self {
        Self {
            tasks: HashMap::new(),
            order: BTreeMap::new(),
            finished: BTreeMap::new(),
            cancel_requested: HashSet::new(),
            next_seq: 0,
            capacity: settings.capacity.max(1),
            history_len: settings.history_len,
        }
    }

    pub fn apply(&mut self, update: TaskUpdate) -> ApplyReport {
        let cancel_requested = self.cancel_requested.contains(&update.id);

        match self.tasks.get_mut(&update.id) {
            Some(slot) => {
                let id = update.id.clone();
                let was_terminal = slot.task.is_terminal();
                let report = apply_update(&mut slot.task, update, cancel_requested, self.history_len);
                if report.ignored_after_terminal {
                    debug!("ignoring non-terminal update for finished task {id}");
                }
                if report.stale_progress {
                    debug!("rejected progress regression for task {id}");
                }
                if !was_terminal && slot.task.is_terminal() {
                    self.finished.insert(slot.seq, id);
                }
                report
            }
            None => {
                let task = create_task(update, cancel_requested, self.history_len);
                let seq = self.next_seq;
                self.next_seq += 1;

                self.order.insert(seq, task.id.clone());
                if task.is_terminal() {
                    self.finished.insert(seq, task.id.clone());
                }
                self.tasks.insert(task.id.clone(), Slot { seq, task });
                ApplyReport {
                    created: true,
                    evicted: self.evict_over_capacity(),
                    ..ApplyReport::default()
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id).map(|slot| &slot.task)
    }

    /// Tasks newest-created first.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.order.values().rev().filter_map(|id| self.get(id))
    }

    pub fn tasks_in_workspace<'a>(
        &'a self,
        workspace_id: &'a str,
    ) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks().filter(move |task| task.workspace_id == workspace_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len() - self.finished.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remember that the client asked to cancel `id`; its eventual failure is reported as a
    /// cancellation. Only running tasks can be marked. Returns whether the mark was recorded.
    pub fn request_cancel(&mut self, id: &str) -> bool {
        if self.get(id).is_some_and(|task| !task.is_terminal()) {
            self.cancel_requested.insert(id.to_string())
        } else {
            false
        }
    }

    /// Forget a cancel request that the backend refused.
    pub fn withdraw_cancel(&mut self, id: &str) -> bool {
        self.cancel_requested.remove(id)
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.cancel_requested.contains(id)
    }

    /// Remove a finished task. Running tasks cannot be dismissed.
    pub fn dismiss(&mut self, id: &str) -> bool {
        if self.get(id).is_some_and(Task::is_terminal) {
            self.remove(id);
            true
        } else {
            false
        }
    }

    pub fn clear_finished(&mut self) -> usize {
        let finished = std::mem::take(&mut self.finished);
        for (seq, id) in &finished {
            self.order.remove(seq);
            self.tasks.remove(id);
        }
        finished.len()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
        self.finished.clear();
        self.cancel_requested.clear();
    }

    fn remove(&mut self, id: &str) {
        if let Some(slot) = self.tasks.remove(id) {
            self.order.remove(&slot.seq);
            self.finished.remove(&slot.seq);
        }
        self.cancel_requested.remove(id);
    }

    /// Drop the oldest finished tasks until back at capacity. Running tasks are never evicted.
    fn evict_over_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.tasks.len() > self.capacity {
            let Some((seq, id)) = self.finished.pop_first() else {
                break;
            };
            self.order.remove(&seq);
            self.tasks.remove(&id);
            evicted += 1;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskStatus, TaskUpdate};
    use chrono::{Duration, TimeZone, Utc};

    fn registry(capacity: usize) -> TaskRegistry {
        TaskRegistry::new(&TaskSettings {
            capacity,
            history_len: 16,
        })
    }

    fn event(id: &str, status: TaskStatus, progress: Option<u8>, second: i64) -> TaskUpdate {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(second);
        TaskUpdate {
            progress,
            workspace_id: Some("ws-1".into()),
            ..TaskUpdate::new(id, status, at)
        }
    }

    #[test]
    fn out_of_order_progress_is_rejected() {
        let mut registry = registry(10);
        registry.apply(event("t1", TaskStatus::Pending, Some(0), 0));
        registry.apply(event("t1", TaskStatus::Started, Some(40), 1));
        let report = registry.apply(event("t1", TaskStatus::Started, Some(10), 2));

        let task = registry.get("t1").unwrap();
        assert!(report.stale_progress);
        assert_eq!(task.progress, 40);
        assert_eq!(task.status, TaskStatus::Started);
        assert_eq!(task.history.len(), 3);
    }

    #[test]
    fn final_status_is_last_terminal_event() {
        let mut registry = registry(10);
        let sequence = [
            event("t1", TaskStatus::Started, Some(20), 0),
            event("t1", TaskStatus::Success, None, 1),
            event("t1", TaskStatus::Started, Some(90), 2),
            event("t1", TaskStatus::Failure, None, 3),
            event("t1", TaskStatus::Pending, None, 4),
        ];
        let reports: Vec<_> = sequence.into_iter().map(|e| registry.apply(e)).collect();

        assert!(reports[2].ignored_after_terminal);
        assert!(reports[4].ignored_after_terminal);
        let task = registry.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failure);
        assert!(task.result().is_none());
        assert!(task.error().is_some());
    }

    #[test]
    fn progress_is_non_decreasing_across_arbitrary_sequences() {
        let mut registry = registry(10);
        let mut last = 0;
        for (i, progress) in [5u8, 3, 17, 17, 9, 60, 59, 100, 0].into_iter().enumerate() {
            registry.apply(event("scan", TaskStatus::Started, Some(progress), i as i64));
            let stored = registry.get("scan").unwrap().progress;
            assert!(stored >= last, "progress went from {last} to {stored}");
            last = stored;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn tasks_are_independent() {
        let mut registry = registry(10);
        registry.apply(event("a", TaskStatus::Started, Some(50), 0));
        registry.apply(event("b", TaskStatus::Failure, None, 1));
        registry.apply(event("a", TaskStatus::Started, Some(70), 2));

        assert_eq!(registry.get("a").unwrap().progress, 70);
        assert_eq!(registry.get("b").unwrap().status, TaskStatus::Failure);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn iteration_is_newest_first() {
        let mut registry = registry(10);
        for (i, id) in ["first", "second", "third"].into_iter().enumerate() {
            registry.apply(event(id, TaskStatus::Pending, None, i as i64));
        }
        registry.apply(event("first", TaskStatus::Started, Some(1), 10));

        let ids: Vec<_> = registry.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["third", "second", "first"]);
    }

    #[test]
    fn dismiss_only_removes_finished_tasks() {
        let mut registry = registry(10);
        registry.apply(event("running", TaskStatus::Started, Some(1), 0));
        registry.apply(event("done", TaskStatus::Success, None, 1));

        assert!(!registry.dismiss("running"));
        assert!(registry.dismiss("done"));
        assert!(registry.get("done").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_finished_tasks_only() {
        let mut registry = registry(2);
        registry.apply(event("old-running", TaskStatus::Started, Some(1), 0));
        registry.apply(event("old-done", TaskStatus::Success, None, 1));
        let report = registry.apply(event("new", TaskStatus::Pending, None, 2));

        assert_eq!(report.evicted, 1);
        assert!(registry.get("old-done").is_none());
        assert!(registry.get("old-running").is_some());

        // Nothing finished left to evict: the registry grows rather than drop live work.
        let report = registry.apply(event("newer", TaskStatus::Pending, None, 3));
        assert_eq!(report.evicted, 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn cancelled_task_failure_carries_cancel_reason() {
        let mut registry = registry(10);
        registry.apply(event("t9", TaskStatus::Started, Some(30), 0));
        registry.request_cancel("t9");
        registry.apply(event("t9", TaskStatus::Failure, None, 1));

        let error = registry.get("t9").unwrap().error().unwrap();
        assert_eq!(error.reason, crate::models::FailureReason::Cancelled);
    }

    #[test]
    fn cancel_marks_only_running_tasks() {
        let mut registry = registry(10);
        registry.apply(event("done", TaskStatus::Success, None, 0));
        registry.apply(event("running", TaskStatus::Started, Some(10), 1));

        assert!(!registry.request_cancel("never-seen"));
        assert!(!registry.request_cancel("done"));
        assert!(registry.request_cancel("running"));
        assert!(!registry.is_cancel_requested("never-seen"));

        registry.apply(event("running", TaskStatus::Failure, None, 2));
        assert_eq!(
            registry.get("running").unwrap().error().unwrap().reason,
            crate::models::FailureReason::Cancelled
        );
    }

    #[test]
    fn bookkeeping_stays_consistent_through_removals() {
        let mut registry = registry(3);
        for i in 0..6 {
            registry.apply(event(&format!("live-{i}"), TaskStatus::Started, Some(1), i));
        }
        registry.apply(event("live-0", TaskStatus::Success, None, 10));
        registry.apply(event("live-3", TaskStatus::Failure, None, 11));
        assert_eq!(registry.active_count(), 4);

        assert!(registry.dismiss("live-3"));
        let report = registry.apply(event("fresh", TaskStatus::Pending, None, 12));
        assert_eq!(report.evicted, 1);
        assert!(registry.get("live-0").is_none());

        let ids: Vec<_> = registry.tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["fresh", "live-5", "live-4", "live-2", "live-1"]);
        assert_eq!(registry.active_count(), 5);
        assert_eq!(registry.clear_finished(), 0);
    }

    #[test]
    fn workspace_filter_and_clear_finished() {
        let mut registry = registry(10);
        registry.apply(event("a", TaskStatus::Success, None, 0));
        registry.apply(TaskUpdate {
            workspace_id: Some("ws-2".into()),
            ..event("b", TaskStatus::Started, Some(5), 1)
        });

        assert_eq!(registry.tasks_in_workspace("ws-2").count(), 1);
        assert_eq!(registry.clear_finished(), 1);
        assert_eq!(registry.len(), 1);
    }
}
