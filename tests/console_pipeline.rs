use anyhow::{bail, Result};
use async_trait::async_trait;
use ops_console::channel::{OperationRequest, OperationsApi};
use ops_console::models::{FailureReason, LogEntry, LogLevel, TaskStatus};
use ops_console::{
    ConsoleConfig, ConsoleEvent, EventChannelAdapter, EventConnection, EventTransport, FilterPatch,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

enum Step {
    Refuse,
    Accept(mpsc::UnboundedReceiver<String>),
}

/// Hands out connections in script order. Once the script runs dry every connect is refused.
#[derive(Clone, Default)]
struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    /// Queue a connection; frames pushed into the returned sender arrive on it, and dropping
    /// the sender closes it.
    fn accept(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.steps.lock().unwrap().push_back(Step::Accept(rx));
        tx
    }

    /// Queue a connection the server closes right after accepting it.
    fn accept_and_close(&self) {
        drop(self.accept());
    }

    fn refuse(&self) {
        self.steps.lock().unwrap().push_back(Step::Refuse);
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn EventConnection>> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Accept(frames)) => Ok(Box::new(ScriptedConnection {
                frames,
                sent: Arc::clone(&self.sent),
            })),
            Some(Step::Refuse) | None => bail!("connection refused"),
        }
    }
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EventConnection for ScriptedConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

#[derive(Default)]
struct FakeApi {
    submitted: Mutex<Vec<OperationRequest>>,
    cancelled: Mutex<Vec<String>>,
    refuse_cancel: bool,
}

#[async_trait]
impl OperationsApi for FakeApi {
    async fn submit(&self, request: &OperationRequest) -> Result<String> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Ok(format!("task-{}", submitted.len()))
    }

    async fn cancel(&self, task_id: &str) -> Result<()> {
        if self.refuse_cancel {
            bail!("task {task_id} is not cancellable");
        }
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

fn fast_config() -> ConsoleConfig {
    let mut config = ConsoleConfig::default();
    config.channel.backoff_initial_ms = 1;
    config.channel.backoff_max_ms = 5;
    config.channel.workspace_id = Some("ws-1".into());
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn task_frame(id: &str, status: &str, progress: Option<u8>) -> String {
    json!({
        "type": "task.update",
        "payload": { "id": id, "workspace_id": "ws-1", "status": status, "progress": progress }
    })
    .to_string()
}

fn log_frame(id: u64, level: &str, message: &str) -> String {
    json!({
        "type": "log.append",
        "payload": { "id": id, "source": "nmap", "level": level, "message": message }
    })
    .to_string()
}

#[tokio::test]
async fn frames_apply_in_order_and_malformed_ones_are_counted() {
    let transport = ScriptedTransport::default();
    let frames = transport.accept();
    let mut adapter = EventChannelAdapter::new(Arc::new(transport.clone()), &fast_config());
    let console = adapter.handle();
    adapter.start().unwrap();

    frames.send(task_frame("t1", "PENDING", None)).unwrap();
    frames.send(log_frame(1, "INFO", "scan started")).unwrap();
    frames.send("{ definitely not json".to_string()).unwrap();
    frames.send(task_frame("t1", "STARTED", Some(40))).unwrap();
    frames.send(task_frame("t1", "STARTED", Some(20))).unwrap();
    frames.send(task_frame("t1", "SUCCESS", None)).unwrap();

    wait_until(|| console.diagnostics().frames_received == 6).await;
    assert!(adapter.is_connected());

    let task = console.task("t1").unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);
    assert_eq!(task.workspace_id, "ws-1");

    let diagnostics = console.diagnostics();
    assert_eq!(diagnostics.malformed_total, 1);
    assert_eq!(diagnostics.malformed_by_reason.get("invalid_json"), Some(&1));
    assert_eq!(diagnostics.stale_progress_rejected, 1);
    assert_eq!(console.log_len(), 1);

    let hello: serde_json::Value = serde_json::from_str(&transport.sent()[0]).unwrap();
    assert_eq!(hello["type"], "subscribe");
    assert_eq!(hello["payload"]["session_id"], adapter.session_id());
    assert_eq!(hello["payload"]["workspace_id"], "ws-1");

    adapter.stop().await.unwrap();
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn reconnect_keeps_state_and_announces_the_gap() {
    let transport = ScriptedTransport::default();
    let first = transport.accept();
    transport.refuse();
    let second = transport.accept();

    let mut adapter = EventChannelAdapter::new(Arc::new(transport.clone()), &fast_config());
    let console = adapter.handle();
    let mut connection = adapter.connection();

    let connected_at_notice = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&connected_at_notice);
    let status = adapter.connection();
    let _subscription = console.subscribe(move |event| {
        if let ConsoleEvent::SessionNotice(_) = event {
            flag.store(status.borrow().connected, Ordering::SeqCst);
        }
    });
    adapter.start().unwrap();

    first.send(task_frame("t1", "STARTED", Some(10))).unwrap();
    wait_until(|| console.task("t1").is_some()).await;
    drop(first);

    tokio::time::timeout(
        Duration::from_secs(5),
        connection.wait_for(|status| status.connected && status.epoch == 2),
    )
    .await
    .expect("second connection not established")
    .unwrap();

    second.send(task_frame("t1", "STARTED", Some(60))).unwrap();
    wait_until(|| console.task("t1").is_some_and(|task| task.progress == 60)).await;

    let notices: Vec<String> = console
        .log_snapshot()
        .into_iter()
        .filter_map(|entry| match entry {
            LogEntry::Notice(notice) => Some(notice.message),
            LogEntry::Record(_) => None,
        })
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].starts_with("Reconnected"));

    assert_eq!(console.diagnostics().reconnects, 1);
    assert_eq!(transport.sent().len(), 2);
    assert!(connected_at_notice.load(Ordering::SeqCst));

    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn worker_stops_after_exhausting_retries() {
    let transport = ScriptedTransport::default();
    let mut config = fast_config();
    config.channel.max_retries = Some(2);

    let mut adapter = EventChannelAdapter::new(Arc::new(transport), &config);
    adapter.start().unwrap();
    wait_until(|| !adapter.is_running()).await;

    assert!(!adapter.is_connected());
    assert_eq!(adapter.connection().borrow().epoch, 0);
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn flapping_server_counts_against_retries_and_adds_no_notices() {
    let transport = ScriptedTransport::default();
    for _ in 0..10 {
        transport.accept_and_close();
    }
    let mut config = fast_config();
    config.channel.max_retries = Some(3);

    let mut adapter = EventChannelAdapter::new(Arc::new(transport.clone()), &config);
    let console = adapter.handle();
    adapter.start().unwrap();
    wait_until(|| !adapter.is_running()).await;

    assert_eq!(adapter.connection().borrow().epoch, 3);
    assert!(!adapter.is_connected());
    assert_eq!(console.log_len(), 0);
    assert_eq!(console.diagnostics().reconnects, 0);
    assert_eq!(transport.sent().len(), 3);
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn connection_that_stays_up_resets_the_retry_budget() {
    let transport = ScriptedTransport::default();
    transport.refuse();
    let quiet = transport.accept();
    transport.refuse();
    transport.refuse();
    let live = transport.accept();

    let mut config = fast_config();
    // Three refusals in total: only a reset in between keeps the worker alive.
    config.channel.max_retries = Some(3);
    config.channel.stable_after_ms = 20;

    let mut adapter = EventChannelAdapter::new(Arc::new(transport.clone()), &config);
    let console = adapter.handle();
    let mut connection = adapter.connection();
    adapter.start().unwrap();

    connection
        .wait_for(|status| status.connected && status.epoch == 1)
        .await
        .unwrap();
    // No frames, but it stays up long enough to count as established.
    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(quiet);

    connection
        .wait_for(|status| status.connected && status.epoch == 2)
        .await
        .unwrap();
    live.send(log_frame(1, "INFO", "back online")).unwrap();
    wait_until(|| console.log_len() == 2).await;

    assert!(adapter.is_running());
    assert_eq!(console.diagnostics().reconnects, 1);
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn subscribers_are_notified_until_unsubscribed() {
    let adapter = EventChannelAdapter::new(Arc::new(ScriptedTransport::default()), &fast_config());
    let console = adapter.handle();
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    let reader = console.clone();
    let subscription = console.subscribe(move |event| {
        if let ConsoleEvent::TaskUpdate(update) = event {
            // State is already updated when handlers run.
            assert!(reader.task(&update.id).is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(console.diagnostics().subscribers, 1);

    adapter.ingest_frame(&task_frame("t1", "PENDING", None));
    subscription.unsubscribe();
    adapter.ingest_frame(&task_frame("t1", "STARTED", Some(5)));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(console.diagnostics().subscribers, 0);
    assert_eq!(console.task("t1").unwrap().status, TaskStatus::Started);
}

#[tokio::test]
async fn submitted_operation_shows_up_pending_and_cancel_is_recorded() {
    let adapter = EventChannelAdapter::new(Arc::new(ScriptedTransport::default()), &fast_config());
    let console = adapter.handle();
    let api = FakeApi::default();

    let request = OperationRequest::new("ws-9", "scan").with_params(json!({ "target": "10.0.0.0/24" }));
    let task_id = adapter.submit_operation(&api, request).await.unwrap();

    let task = console.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.workspace_id, "ws-9");
    assert_eq!(task.operation.as_deref(), Some("scan"));
    assert_eq!(console.tasks_in_workspace("ws-9").len(), 1);

    adapter.cancel_task(&api, &task_id).await.unwrap();
    assert_eq!(*api.cancelled.lock().unwrap(), [task_id.clone()]);

    adapter.ingest_frame(&task_frame(&task_id, "FAILURE", None));
    let task = console.task(&task_id).unwrap();
    assert_eq!(task.error().unwrap().reason, FailureReason::Cancelled);
    assert_eq!(console.active_task_count(), 0);

    assert!(adapter.dismiss_task(&task_id));
    assert!(console.tasks().is_empty());
}

#[tokio::test]
async fn refused_cancel_leaves_failures_as_errors() {
    let adapter = EventChannelAdapter::new(Arc::new(ScriptedTransport::default()), &fast_config());
    let console = adapter.handle();
    let api = FakeApi {
        refuse_cancel: true,
        ..FakeApi::default()
    };

    adapter.ingest_frame(&task_frame("t7", "STARTED", Some(50)));
    assert!(adapter.cancel_task(&api, "t7").await.is_err());

    adapter.ingest_frame(&task_frame("t7", "FAILURE", None));
    let task = console.task("t7").unwrap();
    assert_eq!(task.error().unwrap().reason, FailureReason::Error);
    assert_eq!(task.progress, 50);
}

#[tokio::test]
async fn paused_log_view_freezes_while_filters_still_apply() {
    let adapter = EventChannelAdapter::new(Arc::new(ScriptedTransport::default()), &fast_config());
    let console = adapter.handle();

    adapter.ingest_frame(&log_frame(1, "INFO", "port 22 open"));
    adapter.ingest_frame(&log_frame(2, "ERROR", "host unreachable"));
    assert_eq!(console.visible_logs().len(), 2);

    console.pause_logs();
    adapter.ingest_frame(&log_frame(3, "ERROR", "timeout"));
    assert_eq!(console.visible_logs().len(), 2);
    assert_eq!(console.pending_while_paused(), 1);

    console.set_filter(FilterPatch::levels([LogLevel::Error]));
    let frozen = console.visible_logs();
    assert_eq!(frozen.len(), 1);
    assert_eq!(frozen[0].entry.message(), "host unreachable");

    console.resume_logs();
    assert_eq!(console.visible_logs().len(), 2);
    assert_eq!(console.level_counts().get(&LogLevel::Error), Some(&2));

    adapter.clear_logs();
    assert!(console.visible_logs().is_empty());
}
