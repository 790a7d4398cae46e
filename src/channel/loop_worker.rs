use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelSettings;
use crate::models::SessionNotice;

use super::backoff::Backoff;
use super::dispatcher::Dispatcher;
use super::events::{subscribe_frame, ConsoleEvent};
use super::transport::{EventConnection, EventTransport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub(crate) const RECONNECT_NOTICE: &str =
    "Reconnected to event stream; events sent during the outage may be missing";

/// Whether the channel is live. `epoch` counts accepted connections this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub epoch: u64,
}

pub(crate) struct LoopContext {
    pub transport: Arc<dyn EventTransport>,
    pub dispatcher: Dispatcher,
    pub settings: ChannelSettings,
    pub session_id: String,
    pub status: Arc<watch::Sender<ConnectionStatus>>,
}

pub(crate) async fn connection_loop(ctx: LoopContext, cancel_token: CancellationToken) {
    let mut backoff = Backoff::from_settings(&ctx.settings);
    let stable_after = Duration::from_millis(ctx.settings.stable_after_ms);
    let mut failures: u32 = 0;
    let mut epoch: u64 = 0;
    let mut established_before = false;

    loop {
        let attempt = tokio::select! {
            result = open(ctx.transport.as_ref(), &ctx.settings, &ctx.session_id) => result,
            _ = cancel_token.cancelled() => break,
        };

        let failed = match attempt {
            Ok(mut connection) => {
                epoch += 1;
                log_info!("event channel connected (epoch {epoch})");
                ctx.status.send_replace(ConnectionStatus {
                    connected: true,
                    epoch,
                });

                let on_established = || {
                    failures = 0;
                    backoff.reset();
                    if established_before {
                        ctx.dispatcher.record_reconnect();
                        ctx.dispatcher.dispatch(ConsoleEvent::SessionNotice(SessionNotice {
                            message: RECONNECT_NOTICE.to_string(),
                            timestamp: Utc::now(),
                        }));
                    }
                    established_before = true;
                };
                let end = pump(
                    connection.as_mut(),
                    &ctx.dispatcher,
                    &cancel_token,
                    stable_after,
                    on_established,
                )
                .await;

                ctx.status.send_replace(ConnectionStatus {
                    connected: false,
                    epoch,
                });
                connection.close().await;

                match end {
                    PumpEnd::Cancelled => break,
                    PumpEnd::Dropped { established: true } => {
                        log_warn!("event channel dropped, reconnecting");
                        false
                    }
                    PumpEnd::Dropped { established: false } => {
                        log_warn!("event channel closed before it was established");
                        true
                    }
                }
            }
            Err(err) => {
                log_warn!("event channel connect failed: {err:?}");
                true
            }
        };

        if failed {
            failures += 1;
            log_debug!("{failures} consecutive failed connection attempts");
            if let Some(limit) = ctx.settings.max_retries {
                if failures >= limit {
                    log_error!("giving up on event channel after {failures} failed attempts");
                    break;
                }
            }
        }

        let delay = backoff.next_delay();
        log_debug!("next connect attempt in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    ctx.status.send_modify(|status| status.connected = false);
    log_info!("event channel loop shutting down");
}

enum PumpEnd {
    Cancelled,
    Dropped { established: bool },
}

/// Connect and announce this session. A connection that rejects the hello counts as a failed attempt.
async fn open(
    transport: &dyn EventTransport,
    settings: &ChannelSettings,
    session_id: &str,
) -> Result<Box<dyn EventConnection>> {
    let mut connection = transport.connect().await?;
    let hello = subscribe_frame(session_id, settings.workspace_id.as_deref());
    if let Err(err) = connection.send(hello).await {
        connection.close().await;
        return Err(err.context("subscribe frame rejected"));
    }
    Ok(connection)
}

/// Feed frames into the dispatcher until the peer goes away.
///
/// `on_established` runs once, before the first frame is ingested or when the connection
/// has stayed up for `stable_after`, whichever comes first.
async fn pump(
    connection: &mut dyn EventConnection,
    dispatcher: &Dispatcher,
    cancel_token: &CancellationToken,
    stable_after: Duration,
    mut on_established: impl FnMut() + Send,
) -> PumpEnd {
    let stable = tokio::time::sleep(stable_after);
    tokio::pin!(stable);
    let mut established = false;

    loop {
        tokio::select! {
            frame = connection.recv() => match frame {
                Some(Ok(text)) => {
                    if !established {
                        established = true;
                        on_established();
                    }
                    dispatcher.ingest_frame(&text);
                }
                Some(Err(err)) => {
                    log_warn!("event channel read failed: {err:?}");
                    return PumpEnd::Dropped { established };
                }
                None => {
                    log_info!("event channel closed by peer");
                    return PumpEnd::Dropped { established };
                }
            },
            _ = &mut stable, if !established => {
                established = true;
                on_established();
            }
            _ = cancel_token.cancelled() => return PumpEnd::Cancelled,
        }
    }
}
