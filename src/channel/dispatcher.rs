use chrono::Utc;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::store::ConsoleStore;

use super::events::{decode_frame, ConsoleEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_warn};

const MALFORMED_DETAIL_CHARS: usize = 200;

pub type EventHandler = Arc<dyn Fn(&ConsoleEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct HandlerList {
    handlers: Vec<(u64, EventHandler)>,
    next_id: u64,
}

/// Registered event listeners. Cloning shares the same list.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<HandlerList>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsoleEvent) + Send + Sync + 'static,
    {
        let mut list = lock(&self.inner);
        let id = list.next_id;
        list.next_id += 1;
        list.handlers.push((id, Arc::new(handler)));
        log_debug!("subscriber {id} registered ({} total)", list.handlers.len());

        Subscription {
            id,
            list: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every handler registered at the moment of the call. The list lock is not held
    /// while handlers run, so a handler may subscribe or unsubscribe freely.
    ///
    /// A panicking handler is contained: the remaining handlers still run. Returns how many
    /// handlers panicked.
    pub(crate) fn notify(&self, event: &ConsoleEvent) -> usize {
        let handlers: Vec<(u64, EventHandler)> = lock(&self.inner)
            .handlers
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        let mut panicked = 0;
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log_error!("subscriber {id} panicked while handling {}", event.kind());
                panicked += 1;
            }
        }
        panicked
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
pub struct Subscription {
    id: u64,
    list: Weak<Mutex<HandlerList>>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the handler registered for the rest of the session.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(list) = self.list.upgrade() {
            let mut list = lock(&list);
            list.handlers.retain(|(id, _)| *id != self.id);
            log_debug!("subscriber {} removed ({} left)", self.id, list.handlers.len());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<ConsoleEvent>,
    draining: bool,
}

/// Clears `draining` if the drain loop unwinds, so later dispatches are not parked forever.
struct DrainGuard<'a> {
    queue: &'a Mutex<Queue>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.queue).draining = false;
        }
    }
}

/// Applies events to the store one at a time and then notifies subscribers.
///
/// Dispatch is run-to-completion: an event dispatched from inside a handler is queued
/// and applied only after the current event has reached every subscriber.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    store: ConsoleStore,
    subscribers: Subscribers,
    queue: Arc<Mutex<Queue>>,
}

impl Dispatcher {
    pub(crate) fn new(store: ConsoleStore, subscribers: Subscribers) -> Self {
        Self {
            store,
            subscribers,
            queue: Arc::new(Mutex::new(Queue::default())),
        }
    }

    pub(crate) fn dispatch(&self, event: ConsoleEvent) {
        {
            let mut queue = lock(&self.queue);
            queue.pending.push_back(event);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        let mut guard = DrainGuard {
            queue: &self.queue,
            armed: true,
        };
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            self.store.lock().apply(&next);
            let panicked = self.subscribers.notify(&next);
            if panicked > 0 {
                self.store.lock().diagnostics.record_handler_panics(panicked);
            }
        }
    }

    /// Decode and dispatch one inbound frame. Malformed frames are counted and dropped.
    pub(crate) fn ingest_frame(&self, text: &str) {
        self.store.lock().diagnostics.record_frame();

        match decode_frame(text, Utc::now()) {
            Ok(event) => self.dispatch(event),
            Err(err) => {
                log_warn!("dropping malformed frame: {err}");
                let detail: String = text.chars().take(MALFORMED_DETAIL_CHARS).collect();
                self.store
                    .lock()
                    .diagnostics
                    .record_malformed(err.reason(), detail);
            }
        }
    }

    pub(crate) fn record_reconnect(&self) {
        self.store.lock().diagnostics.record_reconnect();
    }
}
