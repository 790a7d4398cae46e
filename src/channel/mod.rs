pub mod backoff;
pub mod commands;
pub mod controller;
pub mod dispatcher;
pub mod events;
pub mod loop_worker;
pub mod transport;

pub use backoff::Backoff;
pub use commands::{OperationRequest, OperationsApi};
pub use controller::EventChannelAdapter;
pub use dispatcher::{EventHandler, Subscribers, Subscription};
pub use events::{decode_frame, subscribe_frame, ConsoleEvent, DecodeError};
pub use loop_worker::ConnectionStatus;
pub use transport::{EventConnection, EventTransport, WebSocketTransport};
