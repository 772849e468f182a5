//! Overlay multiplexed session transport.
//!
//! The overlay session is a publish/subscribe layer over one WebSocket.
//! Two logical sub-channels share the socket: sub-channel 1 carries text
//! messages, sub-channel 2 carries binary frames. Every publication is one
//! binary WebSocket message:
//!
//! ```text
//! ┌────────────┬─────────────────┬──────────────────┐
//! │ sub: u8    │ peer: u32 (BE)  │ payload ...      │
//! └────────────┴─────────────────┴──────────────────┘
//! ```
//!
//! Inbound publications carry the publisher id of the device; outbound
//! publications are addressed to the most recently seen publisher. The
//! session endpoint is derived once from the page's query parameters, so a
//! lost session is not reconnected.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt, future};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::{Frame, Link, LinkSink, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Sub-channel carrying text messages.
pub const TEXT_CHANNEL: u8 = 1;

/// Sub-channel carrying binary frames.
pub const BINARY_CHANNEL: u8 = 2;

/// Publication header length: sub-channel byte plus peer id.
const HEADER_LEN: usize = 5;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Publication
// ============================================================================

/// One publication on the overlay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Sub-channel id.
    pub channel: u8,
    /// Publisher (inbound) or destination (outbound).
    pub peer: PeerId,
    /// Message body.
    pub payload: Vec<u8>,
}

impl Publication {
    /// Encodes the publication into one WebSocket payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(self.channel);
        bytes.extend_from_slice(&self.peer.get().to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decodes one WebSocket payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the header is truncated.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::protocol(format!(
                "overlay publication too short: {} bytes",
                bytes.len()
            )));
        }

        let peer = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

        Ok(Self {
            channel: bytes[0],
            peer: PeerId::new(peer),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// OverlayTransport
// ============================================================================

/// Single-use overlay session transport.
#[derive(Debug)]
pub struct OverlayTransport {
    /// Session endpoint including the page query string.
    url: Url,
    /// Set once the session has been opened.
    used: AtomicBool,
}

impl OverlayTransport {
    /// Creates a transport for the session endpoint `url`.
    #[inline]
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            used: AtomicBool::new(false),
        }
    }

    /// Returns the session endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for OverlayTransport {
    async fn connect(&self) -> Result<Link> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::NotReconnectable {
                transport: self.describe(),
            });
        }

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("overlay {}: {e}", self.url)))?;

        debug!(url = %self.url, "Overlay session connected");

        let peer = Arc::new(AtomicU32::new(PeerId::UNKNOWN.get()));
        let (write, read) = ws_stream.split();

        let read_peer = Arc::clone(&peer);
        let stream = read
            .filter_map(move |message| future::ready(map_incoming(message, &read_peer)))
            .boxed();

        Ok(Link::new(Box::new(OverlaySink { write, peer }), stream))
    }

    fn reconnectable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("overlay {}", self.url)
    }
}

/// Unwraps an overlay publication into a link frame.
///
/// Text publications update the device's publisher id.
fn map_incoming(
    message: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
    peer: &AtomicU32,
) -> Option<Result<Frame>> {
    let data = match message {
        Ok(Message::Binary(data)) => data,
        Ok(Message::Close(close)) => {
            let reason = close
                .map(|c| c.reason.as_str().to_owned())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "session closed".to_string());
            return Some(Err(Error::connection_lost(format!("overlay: {reason}"))));
        }
        Ok(Message::Text(_)) => {
            warn!("Unexpected text message on overlay session");
            return None;
        }
        Ok(_) => return None,
        Err(e) => return Some(Err(Error::WebSocket(e))),
    };

    let publication = match Publication::decode(&data) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Dropping overlay publication");
            return None;
        }
    };

    match publication.channel {
        TEXT_CHANNEL => {
            peer.store(publication.peer.get(), Ordering::SeqCst);
            match String::from_utf8(publication.payload) {
                Ok(text) => Some(Ok(Frame::Text(text))),
                Err(_) => {
                    warn!(peer = %publication.peer, "Non UTF-8 text publication");
                    None
                }
            }
        }
        BINARY_CHANNEL => Some(Ok(Frame::Binary(publication.payload))),
        other => {
            warn!(channel = other, "Publication on unknown sub-channel");
            None
        }
    }
}

// ============================================================================
// OverlaySink
// ============================================================================

struct OverlaySink {
    write: SplitSink<WsStream, Message>,
    peer: Arc<AtomicU32>,
}

#[async_trait]
impl LinkSink for OverlaySink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let peer = PeerId::new(self.peer.load(Ordering::SeqCst));
        if !peer.is_known() {
            debug!("Publishing before the device announced itself");
        }

        let (channel, payload) = match frame {
            Frame::Text(text) => (TEXT_CHANNEL, text.into_bytes()),
            Frame::Binary(data) => (BINARY_CHANNEL, data),
        };

        trace!(channel, %peer, len = payload.len(), "publish");

        let publication = Publication {
            channel,
            peer,
            payload,
        };
        self.write
            .send(Message::Binary(publication.encode().into()))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
