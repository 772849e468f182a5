//! Connection task.
//!
//! The manager owns the transport and runs one tokio task that:
//!
//! - Opens links and drives the lifecycle state machine
//! - Writes outgoing frames queued through [`Connection`]
//! - Hands incoming text frames to the [`EventBus`]
//! - Rejects pending RPC calls and emits `close` on link loss
//! - Reconnects with backoff when the transport allows it
//!
//! Handlers run on this task one at a time, in arrival order.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, Lifecycle};
use crate::rpc::RpcChannel;
use crate::transport::{Frame, Link, Transport};

use super::{Connection, ConnectionCommand, ConnectionState, ReconnectPolicy};

// ============================================================================
// Constants
// ============================================================================

/// Reason reported when the session is shut down by the caller.
const SHUTDOWN_REASON: &str = "connection shut down";

// ============================================================================
// LinkEnd
// ============================================================================

/// Why a link stopped.
enum LinkEnd {
    /// Shutdown requested by the caller.
    Shutdown,
    /// Transport failure, with a human-readable reason.
    Lost(String),
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns the transport and the connection task.
pub struct ConnectionManager {
    worker: Worker,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ConnectionManager {
    /// Creates a manager. Nothing happens until [`ConnectionManager::connect`].
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        connection: Connection,
        bus: Arc<EventBus>,
        rpc: Arc<RpcChannel>,
    ) -> Self {
        Self {
            worker: Worker {
                transport,
                policy,
                connect_timeout,
                connection,
                bus,
                rpc,
            },
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Starts the connection task, or does nothing if it is running.
    ///
    /// After a terminal state the direct transport may be started again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReconnectable`] when the overlay session has
    /// already been used.
    pub fn connect(&self) -> Result<()> {
        let mut task = self.task.lock();

        if let Some(handle) = task.as_ref()
            && !handle.is_finished()
        {
            debug!("Connection task already running");
            return Ok(());
        }

        if self.started.swap(true, Ordering::SeqCst) && !self.worker.transport.reconnectable() {
            return Err(Error::NotReconnectable {
                transport: self.worker.transport.describe(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.worker.connection.attach(tx);
        self.worker.connection.set_state(ConnectionState::Connecting);

        info!(transport = %self.worker.transport.describe(), "Connecting");

        *task = Some(tokio::spawn(self.worker.clone().run(rx)));
        Ok(())
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.worker.connection.status()
    }

    /// Stops the connection task and waits for it to finish.
    ///
    /// Emits `close(false, ..)` and rejects pending calls if the task was
    /// running.
    pub async fn shutdown(&self) {
        if !self.worker.connection.request_shutdown() {
            return;
        }

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Connection task ended abnormally");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.worker.transport.describe())
            .field("state", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Everything the connection task needs.
#[derive(Clone)]
struct Worker {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    connection: Connection,
    bus: Arc<EventBus>,
    rpc: Arc<RpcChannel>,
}

impl Worker {
    /// Connection task body.
    async fn run(self, mut commands: mpsc::UnboundedReceiver<ConnectionCommand>) {
        let reconnectable = self.transport.reconnectable();
        let mut ever_open = false;
        let mut attempt: u32 = 0;

        loop {
            self.connection.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                result = self.open_link() => result,
                () = wait_for_shutdown(&mut commands) => {
                    self.finish(ConnectionState::Closed, SHUTDOWN_REASON);
                    return;
                }
            };

            let failure = match opened {
                Ok(link) => {
                    attempt = 0;
                    ever_open = true;

                    self.connection.set_state(ConnectionState::Open);
                    info!(transport = %self.transport.describe(), "Connection open");
                    self.bus.dispatch_lifecycle(&Lifecycle::Open);

                    match self.pump(link, &mut commands).await {
                        LinkEnd::Shutdown => {
                            self.finish(ConnectionState::Closed, SHUTDOWN_REASON);
                            return;
                        }
                        LinkEnd::Lost(reason) if reconnectable => {
                            if discard_queued(&mut commands) {
                                debug!(%reason, "Link lost with shutdown pending");
                                self.finish(ConnectionState::Closed, SHUTDOWN_REASON);
                                return;
                            }
                            self.connection.set_state(ConnectionState::Connecting);
                            warn!(%reason, "Connection lost, reconnecting");
                            self.rpc.reject_all(&reason);
                            self.bus.dispatch_lifecycle(&Lifecycle::Close {
                                will_reconnect: true,
                                reason: reason.clone(),
                            });
                            reason
                        }
                        LinkEnd::Lost(reason) => {
                            warn!(%reason, "Connection lost");
                            self.finish(ConnectionState::Closed, &reason);
                            return;
                        }
                    }
                }
                Err(e) if !ever_open => {
                    let state = if reconnectable {
                        ConnectionState::CannotConnect
                    } else {
                        ConnectionState::Closed
                    };
                    warn!(error = %e, "Cannot connect");
                    self.finish(state, &loss_reason(e));
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    loss_reason(e)
                }
            };

            attempt = attempt.saturating_add(1);
            if !self.policy.allows(attempt) {
                let reason = format!(
                    "giving up after {} reconnect attempts: {failure}",
                    attempt - 1
                );
                self.finish(ConnectionState::Closed, &reason);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            debug!(attempt, delay_ms = millis(delay), "Reconnect scheduled");

            tokio::select! {
                () = sleep(delay) => {}
                () = wait_for_shutdown(&mut commands) => {
                    self.finish(ConnectionState::Closed, SHUTDOWN_REASON);
                    return;
                }
            }
        }
    }

    /// Opens a link within the connect timeout.
    async fn open_link(&self) -> Result<Link> {
        timeout(self.connect_timeout, self.transport.connect())
            .await
            .map_err(|_| Error::connection_timeout(millis(self.connect_timeout)))?
    }

    /// Moves frames between the link and the rest of the client until the
    /// link ends.
    async fn pump(
        &self,
        link: Link,
        commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            self.bus.dispatch_incoming(&text);
                        }

                        Some(Ok(Frame::Binary(data))) => {
                            warn!(len = data.len(), "Dropping binary message from device");
                        }

                        Some(Err(e)) => return LinkEnd::Lost(loss_reason(e)),

                        None => return LinkEnd::Lost("connection closed by device".to_string()),
                    }
                }

                command = commands.recv() => {
                    let sent = match command {
                        Some(ConnectionCommand::Text(text)) => sink.send_text(text).await,
                        Some(ConnectionCommand::Binary(data)) => sink.send_binary(data).await,
                        Some(ConnectionCommand::Shutdown) | None => {
                            if let Err(e) = sink.close().await {
                                debug!(error = %e, "Close handshake failed");
                            }
                            return LinkEnd::Shutdown;
                        }
                    };

                    if let Err(e) = sent {
                        return LinkEnd::Lost(loss_reason(e));
                    }
                }
            }
        }
    }

    /// Enters a terminal state.
    fn finish(&self, state: ConnectionState, reason: &str) {
        self.connection.set_state(state);
        self.connection.detach();
        info!(%state, %reason, "Connection finished");

        self.rpc.reject_all(reason);
        self.bus.dispatch_lifecycle(&Lifecycle::Close {
            will_reconnect: false,
            reason: reason.to_string(),
        });
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolves once a shutdown is requested; other commands are discarded.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>) {
    loop {
        match commands.recv().await {
            Some(ConnectionCommand::Shutdown) | None => return,
            Some(_) => debug!("Discarding frame queued while not open"),
        }
    }
}

/// Drops frames queued for a link that no longer exists.
///
/// Returns `true` if a shutdown request was queued among them.
fn discard_queued(commands: &mut mpsc::UnboundedReceiver<ConnectionCommand>) -> bool {
    let mut dropped = 0usize;
    let mut shutdown = false;
    while let Ok(command) = commands.try_recv() {
        if matches!(command, ConnectionCommand::Shutdown) {
            shutdown = true;
            break;
        }
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "Discarded frames queued for the lost link");
    }
    shutdown
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn loss_reason(error: Error) -> String {
    match error {
        Error::ConnectionLost { reason } => reason,
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
