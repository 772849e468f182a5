//! Transport layer.
//!
//! A [`Transport`] produces a [`Link`] per connection attempt. A link is a
//! frame sink plus a frame stream; the connection manager owns it for the
//! lifetime of one physical connection and treats the end of the stream as
//! connection loss.
//!
//! # Variants
//!
//! ```text
//! ┌──────────────┐   direct WebSocket     ┌──────────┐
//! │              │◄──────────────────────►│          │
//! │  Connection  │                        │  Device  │
//! │  Manager     │   overlay session      │          │
//! │              │◄══ sub 1: text ═══════►│          │
//! │              │◄══ sub 2: binary ═════►│          │
//! └──────────────┘                        └──────────┘
//! ```
//!
//! [`TransportSelector`] picks the variant once, at build time.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `direct` | Point-to-point WebSocket, reconnectable |
//! | `overlay` | Multiplexed pub/sub session, single use |
//! | `selector` | Variant selection and URL derivation |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Direct WebSocket transport.
pub mod direct;

/// Overlay multiplexed session transport.
pub mod overlay;

/// Transport variant selection.
pub mod selector;

// ============================================================================
// Re-exports
// ============================================================================

pub use direct::DirectTransport;
pub use overlay::OverlayTransport;
pub use selector::{SelectedTransport, TransportSelector};

// ============================================================================
// Frame
// ============================================================================

/// One message on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text channel message.
    Text(String),
    /// Binary channel message.
    Binary(Vec<u8>),
}

/// Incoming frames. An `Err` item or the end of the stream means the link
/// is gone.
pub type FrameStream = BoxStream<'static, Result<Frame>>;

// ============================================================================
// LinkSink
// ============================================================================

/// Write half of a link.
#[async_trait]
pub trait LinkSink: Send {
    /// Sends one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Closes the link.
    async fn close(&mut self) -> Result<()>;

    /// Sends on the text channel.
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Frame::Text(text)).await
    }

    /// Sends on the binary channel.
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.send(Frame::Binary(data)).await
    }
}

// ============================================================================
// Link
// ============================================================================

/// An established connection.
pub struct Link {
    /// Outgoing half.
    pub sink: Box<dyn LinkSink>,
    /// Incoming half.
    pub stream: FrameStream,
}

impl Link {
    /// Creates a link from its halves.
    #[inline]
    #[must_use]
    pub fn new(sink: Box<dyn LinkSink>, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Connection factory shared by both transport variants.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new link.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the device cannot be reached.
    async fn connect(&self) -> Result<Link>;

    /// Returns `true` if a lost link may be replaced by calling
    /// [`Transport::connect`] again.
    fn reconnectable(&self) -> bool;

    /// Human-readable description used in logs and errors.
    fn describe(&self) -> String;
}
