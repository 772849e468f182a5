//! Device Link - control client for network-attached embedded devices.
//!
//! Keeps one real-time channel to a device and layers on top of it:
//!
//! - Named-message publish/subscribe
//! - Request/response RPC with correlation ids
//! - Windowed, acknowledged binary upload (firmware images and the like)
//!
//! # Architecture
//!
//! ```text
//!  caller ──► Client ──► RpcChannel ─┐
//!               │                    ├──► Connection ──► connection task ──► Transport
//!               ├──► UploadController┘                          │
//!               │                                               ▼
//!               └──► EventBus ◄──────────── text frames ────────┘
//!                      ├──► RpcChannel::resolve   ("AJAX")
//!                      ├──► UploadController      ("uploadack", close)
//!                      └──► subscribers
//! ```
//!
//! Two transports implement the same interface: a direct WebSocket, which
//! reconnects with backoff, and a single-use overlay pub/sub session
//! multiplexing text and binary sub-channels over one WebSocket. The
//! variant is chosen once when the client is built.
//!
//! # Quick Start
//!
//! ```no_run
//! use device_link::{Client, Result, SetLed};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .page_url("http://192.168.1.20/")
//!         .build()?;
//!
//!     client.on_close(|will_reconnect, reason| {
//!         println!("closed ({reason}), retrying: {will_reconnect}");
//!     });
//!     client.connect()?;
//!
//!     let sum = client.call("math/add", vec![json!(2), json!(3)]).await?;
//!     println!("2 + 3 = {sum}");
//!
//!     client.send_message(&SetLed { id: 1, on: true })?;
//!
//!     let firmware = std::fs::read("firmware.bin")?;
//!     let outcome = client.upload(firmware).await?;
//!     println!("upload: {outcome:?}");
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] session context and configuration |
//! | [`connection`] | Lifecycle state machine and reconnection |
//! | [`events`] | [`EventBus`] and event types |
//! | [`rpc`] | [`RpcChannel`] correlation |
//! | [`upload`] | Flow-controlled upload |
//! | [`protocol`] | Wire formats |
//! | [`transport`] | Direct and overlay transports |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe id wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Session context and configuration.
///
/// Use [`Client::builder()`] to create a client.
pub mod client;

/// Connection lifecycle and reconnection.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event registry and dispatch.
pub mod events;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire formats for the text and binary channels.
pub mod protocol;

/// RPC correlation.
pub mod rpc;

/// Link-level transports.
pub mod transport;

/// Flow-controlled binary upload.
pub mod upload;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ClientOptions};

// Connection types
pub use connection::{ConnectionState, ReconnectPolicy};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{Event, EventBus, Lifecycle, Topic};

// Identifier types
pub use identifiers::{CorrelationId, PeerId, SubscriptionId};

// Protocol types
pub use protocol::{
    AuthRequest, BinaryFrame, DeviceMessage, DeviceName, FrameTag, Led, LedInfo, NamedMessage,
    Nonce, SetLed, Temperature, UploadAck,
};

// RPC types
pub use rpc::RpcChannel;

// Transport types
pub use transport::{Frame, Link, LinkSink, Transport, TransportSelector};

// Upload types
pub use upload::{UploadOutcome, UploadProgress};
