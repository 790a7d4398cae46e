pub mod channel;
pub mod config;
pub mod logs;
pub mod metrics;
pub mod models;
pub mod store;
pub mod tasks;
pub mod utils;
pub mod windows;

pub use channel::{
    ConnectionStatus, ConsoleEvent, DecodeError, EventChannelAdapter, EventConnection,
    EventTransport, OperationRequest, OperationsApi, Subscription, WebSocketTransport,
};
pub use config::{ConfigStore, ConsoleConfig};
pub use logs::{FilterPatch, FilterState, ScrollAction, ScrollArbiter, VisibleLine};
pub use metrics::DiagnosticsSnapshot;
pub use models::{
    FailureReason, LogEntry, LogLevel, LogRecord, LogSource, SessionNotice, Task, TaskError,
    TaskStatus, TaskUpdate,
};
pub use store::ConsoleHandle;
pub use windows::{Geometry, Point, Size, WindowKind, WindowStack};

use env_logger::Env;

/// Install the `env_logger` backend. `RUST_LOG` wins over the default filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
