//! Connection lifecycle.
//!
//! # State Machine
//!
//! ```text
//!            connect()
//!  Closed ─────────────► Connecting ──── handshake ───► Open
//!    ▲                      │  ▲                         │
//!    │                      │  └── loss (direct) ────────┤
//!    │   first attempt      ▼                            │
//!    │   fails (direct)  CannotConnect                   │
//!    └────────── loss (overlay) / shutdown / retry cap ──┘
//! ```
//!
//! [`Connection`] is the cheap, cloneable handle used by the other
//! components to observe the state and to send. [`ConnectionManager`] owns
//! the task that drives the transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{BinaryFrame, NamedMessage};

// ============================================================================
// Submodules
// ============================================================================

/// Reconnection backoff policy.
pub mod backoff;

/// Connection task.
pub mod manager;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::ReconnectPolicy;
pub use manager::ConnectionManager;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection status as observed by collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, not trying.
    #[default]
    Closed,
    /// Handshake or reconnection in progress.
    Connecting,
    /// Ready for traffic.
    Open,
    /// The first attempt never reached [`ConnectionState::Open`].
    CannotConnect,
}

impl ConnectionState {
    /// Returns `true` when sends are accepted.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::CannotConnect => "cannot-connect",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the connection task.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Write a text frame.
    Text(String),
    /// Write a binary frame.
    Binary(Vec<u8>),
    /// Close the link and stop.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

struct Shared {
    state: RwLock<ConnectionState>,
    commands: Mutex<Option<mpsc::UnboundedSender<ConnectionCommand>>>,
}

/// Shared handle to the single logical connection.
///
/// Sends are forwarded to the connection task without queuing: while the
/// state is not [`ConnectionState::Open`] they fail with
/// [`Error::NotOpen`].
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Closed),
                commands: Mutex::new(None),
            }),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Sends a named message on the text channel.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the connection is not open
    /// - [`Error::Json`] if the payload cannot be serialized
    pub fn send_message(&self, message: &NamedMessage) -> Result<()> {
        let text = message.to_wire()?;
        trace!(name = %message.name, "queue text message");
        self.send_command(ConnectionCommand::Text(text))
    }

    /// Sends `[name, payload]` on the text channel.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_message`].
    pub fn send_json(&self, name: impl Into<String>, payload: Value) -> Result<()> {
        self.send_message(&NamedMessage::new(name, payload))
    }

    /// Sends a tagged frame on the binary channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if the connection is not open.
    pub fn send_binary(&self, frame: &BinaryFrame) -> Result<()> {
        self.send_command(ConnectionCommand::Binary(frame.encode()))
    }

    fn send_command(&self, command: ConnectionCommand) -> Result<()> {
        let state = self.status();
        if !state.is_open() {
            return Err(Error::not_open(state));
        }

        let commands = self.shared.commands.lock();
        match commands.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| Error::not_open(self.status())),
            None => Err(Error::not_open(state)),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.shared.state.write(), state)
    }

    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<ConnectionCommand>) {
        *self.shared.commands.lock() = Some(tx);
    }

    pub(crate) fn detach(&self) {
        self.shared.commands.lock().take();
    }

    /// Asks the connection task to stop. Returns `false` if none is attached.
    pub(crate) fn request_shutdown(&self) -> bool {
        self.shared
            .commands
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(ConnectionCommand::Shutdown).is_ok())
    }

    /// An open connection whose task end is held by the test.
    #[cfg(test)]
    pub(crate) fn open_for_test() -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let connection = Self::new();
        let (tx, rx) = mpsc::unbounded_channel();
        connection.attach(tx);
        connection.set_state(ConnectionState::Open);
        (connection, rx)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
