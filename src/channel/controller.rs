use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ChannelSettings, ConsoleConfig};
use crate::models::{TaskId, TaskStatus, TaskUpdate};
use crate::store::{ConsoleHandle, ConsoleStore};

use super::commands::{OperationRequest, OperationsApi};
use super::dispatcher::{Dispatcher, Subscribers, Subscription};
use super::events::ConsoleEvent;
use super::loop_worker::{connection_loop, ConnectionStatus, LoopContext};
use super::transport::{EventTransport, WebSocketTransport};

/// Owns the push channel for one console session and the state it feeds.
///
/// `start` spawns the connection worker; `stop` cancels it and waits for it to finish.
/// Task and log state outlive both, so a restarted channel continues where it left off.
pub struct EventChannelAdapter {
    transport: Arc<dyn EventTransport>,
    settings: ChannelSettings,
    session_id: String,
    store: ConsoleStore,
    subscribers: Subscribers,
    dispatcher: Dispatcher,
    status: Arc<watch::Sender<ConnectionStatus>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl EventChannelAdapter {
    pub fn new(transport: Arc<dyn EventTransport>, config: &ConsoleConfig) -> Self {
        let store = ConsoleStore::new(config);
        let subscribers = Subscribers::new();
        let dispatcher = Dispatcher::new(store.clone(), subscribers.clone());
        let (status, _) = watch::channel(ConnectionStatus::default());

        Self {
            transport,
            settings: config.channel.clone(),
            session_id: Uuid::new_v4().to_string(),
            store,
            subscribers,
            dispatcher,
            status: Arc::new(status),
            handle: None,
            cancel_token: None,
        }
    }

    /// Adapter over a WebSocket connection to `config.channel.url`.
    pub fn websocket(config: &ConsoleConfig) -> Result<Self> {
        let transport = WebSocketTransport::new(&config.channel.url)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("event channel already active");
        }

        let cancel_token = CancellationToken::new();
        let ctx = LoopContext {
            transport: Arc::clone(&self.transport),
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
            session_id: self.session_id.clone(),
            status: Arc::clone(&self.status),
        };
        info!("starting event channel for session {}", self.session_id);
        let handle = tokio::spawn(connection_loop(ctx, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("event channel task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    /// True while the worker is alive. A worker that gave up retrying counts as stopped.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    /// Watch connection changes. The epoch increments on every successful connect.
    pub fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn handle(&self) -> ConsoleHandle {
        ConsoleHandle::new(self.store.clone(), self.subscribers.clone())
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsoleEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Apply a locally produced event as if it had arrived on the channel.
    pub fn dispatch(&self, event: ConsoleEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Feed one raw frame through decoding, as the worker does for every received frame.
    pub fn ingest_frame(&self, text: &str) {
        self.dispatcher.ingest_frame(text);
    }

    pub fn dismiss_task(&self, id: &str) -> bool {
        self.store.lock().tasks.dismiss(id)
    }

    pub fn clear_finished_tasks(&self) -> usize {
        self.store.lock().tasks.clear_finished()
    }

    pub fn clear_logs(&self) {
        self.store.lock().logs.clear();
    }

    pub fn reset_diagnostics(&self) {
        self.store.lock().diagnostics.reset();
    }

    /// Submit an operation and show it as PENDING right away, before the backend reports on it.
    pub async fn submit_operation(
        &self,
        api: &dyn OperationsApi,
        request: OperationRequest,
    ) -> Result<TaskId> {
        let task_id = api
            .submit(&request)
            .await
            .with_context(|| format!("failed to submit {} operation", request.operation))?;

        let mut update = TaskUpdate::new(task_id.clone(), TaskStatus::Pending, Utc::now())
            .with_workspace(request.workspace_id);
        update.operation = Some(request.operation);
        self.dispatch(ConsoleEvent::TaskUpdate(update));

        Ok(task_id)
    }

    /// Ask the backend to cancel a task. The FAILURE that follows is recorded as a cancellation.
    pub async fn cancel_task(&self, api: &dyn OperationsApi, task_id: &str) -> Result<()> {
        self.store.lock().tasks.request_cancel(task_id);

        if let Err(err) = api.cancel(task_id).await {
            warn!("cancel request for task {task_id} failed: {err:?}");
            self.store.lock().tasks.withdraw_cancel(task_id);
            return Err(err.context(format!("failed to cancel task {task_id}")));
        }
        Ok(())
    }
}

impl Drop for EventChannelAdapter {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
