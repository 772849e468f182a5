//! Error types for the device link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use device_link::{Client, Result};
//!
//! async fn add(client: &Client) -> Result<f64> {
//!     let sum = client.call("math/add", vec![2.into(), 3.into()]).await?;
//!     Ok(sum.as_f64().unwrap_or_default())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::NotOpen`], [`Error::ConnectionLost`], [`Error::NotReconnectable`] |
//! | Protocol | [`Error::Protocol`] |
//! | Caller defects | [`Error::Usage`] |
//! | RPC | [`Error::Rpc`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::connection::ConnectionState;
use crate::identifiers::CorrelationId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the client builder is given inconsistent settings.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The transport handshake did not finish in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A send was attempted while the connection is not open.
    ///
    /// There is no internal queue: callers check [`crate::Client::status`]
    /// or wait for the `open` event.
    #[error("Connection is not open (state: {state})")]
    NotOpen {
        /// State observed at the time of the send.
        state: ConnectionState,
    },

    /// The connection went down while an operation was outstanding.
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// Human-readable reason carried by the `close` event.
        reason: String,
    },

    /// The selected transport cannot be connected a second time.
    #[error("Transport '{transport}' cannot reconnect")]
    NotReconnectable {
        /// Transport description.
        transport: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message from the device.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Caller-side defect, such as subscribing to a reserved message name,
    /// removing an unknown subscription or starting a second upload.
    #[error("Incorrect use: {message}")]
    Usage {
        /// Description of the misuse.
        message: String,
    },

    // ========================================================================
    // RPC Errors
    // ========================================================================
    /// The device rejected an RPC call.
    #[error("RPC '{service}' failed: {error}")]
    Rpc {
        /// Service name given to the call.
        service: String,
        /// Error value provided by the device.
        error: Value,
    },

    /// RPC response not received in time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The correlation id that timed out.
        request_id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a not-open error.
    #[inline]
    pub fn not_open(state: ConnectionState) -> Self {
        Self::NotOpen { state }
    }

    /// Creates a connection lost error.
    #[inline]
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a usage error.
    #[inline]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates an RPC failure carrying the device's error value.
    #[inline]
    pub fn rpc(service: impl Into<String>, error: Value) -> Self {
        Self::Rpc {
            service: service.into(),
            error,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: CorrelationId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotOpen { .. }
                | Self::ConnectionLost { .. }
                | Self::NotReconnectable { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is a caller-side defect.
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }

    /// Returns the device-provided error value of a rejected RPC call.
    #[inline]
    #[must_use]
    pub fn rpc_error(&self) -> Option<&Value> {
        match self {
            Self::Rpc { error, .. } => Some(error),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
