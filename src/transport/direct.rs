//! Direct WebSocket transport.
//!
//! One WebSocket per link; text frames carry named messages and binary
//! frames carry tagged binary messages. A lost link can be replaced, so
//! this variant is reconnectable.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt, future};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

use super::{Frame, Link, LinkSink, Transport};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// DirectTransport
// ============================================================================

/// Point-to-point WebSocket transport.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    /// Device endpoint, `ws://` or `wss://`.
    url: Url,
}

impl DirectTransport {
    /// Creates a transport targeting `url`.
    #[inline]
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Returns the target endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn connect(&self) -> Result<Link> {
        let (ws_stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.url)))?;

        debug!(url = %self.url, status = %response.status(), "WebSocket connected");

        let (write, read) = ws_stream.split();

        let stream = read
            .filter_map(|message| future::ready(map_incoming(message)))
            .boxed();

        Ok(Link::new(Box::new(DirectSink { write }), stream))
    }

    fn reconnectable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("websocket {}", self.url)
    }
}

/// Maps a WebSocket message to a link frame; control frames are skipped.
fn map_incoming(
    message: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
        Ok(Message::Close(close)) => {
            let reason = close
                .map(|c| format!("WebSocket closed ({}): {}", u16::from(c.code), c.reason.as_str()))
                .unwrap_or_else(|| "WebSocket closed".to_string());
            Some(Err(Error::connection_lost(reason)))
        }
        Ok(_) => None,
        Err(e) => Some(Err(Error::WebSocket(e))),
    }
}

// ============================================================================
// DirectSink
// ============================================================================

struct DirectSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LinkSink for DirectSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => {
                trace!(len = text.len(), "send text");
                Message::Text(text.into())
            }
            Frame::Binary(data) => {
                trace!(len = data.len(), "send binary");
                Message::Binary(data.into())
            }
        };
        self.write.send(message).await?;
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

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_direct_is_reconnectable() {
        let transport = DirectTransport::new(Url::parse("ws://device/").expect("url"));
        assert!(transport.reconnectable());
        assert_eq!(transport.describe(), "websocket ws://device/");
    }

    #[test]
    fn test_map_text_and_binary() {
        let text = map_incoming(Ok(Message::Text("[\"a\",1]".into())));
        assert!(matches!(text, Some(Ok(Frame::Text(t))) if t == "[\"a\",1]"));

        let binary = map_incoming(Ok(Message::Binary(vec![1u8, 2].into())));
        assert!(matches!(binary, Some(Ok(Frame::Binary(b))) if b == vec![1, 2]));
    }

    #[test]
    fn test_map_skips_ping() {
        assert!(map_incoming(Ok(Message::Ping(Vec::<u8>::new().into()))).is_none());
    }

    #[test]
    fn test_map_close_carries_reason() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "rebooting".into(),
        }));
        match map_incoming(Ok(close)) {
            Some(Err(Error::ConnectionLost { reason })) => {
                assert!(reason.contains("rebooting"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).expect("url");
        let transport = DirectTransport::new(url);
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
