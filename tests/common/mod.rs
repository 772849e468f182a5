//! In-memory device for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use device_link::protocol::{RpcRequest, RpcResponse, RpcEnvelope};
use device_link::{Client, Error, Frame, Link, LinkSink, NamedMessage, Result, Transport};
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// MockTransport
// ============================================================================

struct Shared {
    reconnectable: bool,
    refusals: AtomicU32,
    attempts: AtomicU32,
    devices: mpsc::UnboundedSender<DeviceEnd>,
}

/// Transport whose links terminate in [`DeviceEnd`]s handed to the test.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test side of a [`MockTransport`]: yields one [`DeviceEnd`] per link.
pub struct Devices {
    rx: Mutex<mpsc::UnboundedReceiver<DeviceEnd>>,
}

impl MockTransport {
    pub fn new(reconnectable: bool) -> (Self, Devices) {
        let (devices, rx) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::new(Shared {
                reconnectable,
                refusals: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
                devices,
            }),
        };
        (transport, Devices { rx: Mutex::new(rx) })
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse(&self, count: u32) {
        self.shared.refusals.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<Link> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::connection("device refused"));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel::<Result<Frame>>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<Frame>();

        self.shared
            .devices
            .send(DeviceEnd {
                to_client,
                from_client,
            })
            .map_err(|_| Error::connection("test harness gone"))?;

        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();

        Ok(Link::new(Box::new(MockSink { tx: client_tx }), stream))
    }

    fn reconnectable(&self) -> bool {
        self.shared.reconnectable
    }

    fn describe(&self) -> String {
        "mock device".to_string()
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl LinkSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::connection_lost("device hung up"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Devices {
    /// Waits for the client to open the next link.
    pub async fn accept(&self) -> DeviceEnd {
        timeout(WAIT, self.rx.lock().await.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }
}

// ============================================================================
// DeviceEnd
// ============================================================================

/// The device's side of one link.
pub struct DeviceEnd {
    to_client: mpsc::UnboundedSender<Result<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl DeviceEnd {
    pub fn send_text(&self, text: &str) {
        self.to_client
            .send(Ok(Frame::Text(text.to_string())))
            .expect("client listening");
    }

    pub fn send_json(&self, name: &str, payload: Value) {
        let text = NamedMessage::new(name, payload).to_wire().expect("encode");
        self.send_text(&text);
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        self.to_client
            .send(Ok(Frame::Binary(data)))
            .expect("client listening");
    }

    /// Answers an RPC request.
    pub fn respond(&self, request: &RpcRequest, envelope: RpcEnvelope) {
        let message = RpcResponse::new(request.id, envelope).to_message();
        self.send_json(&message.name, message.payload);
    }

    /// Breaks the link with a transport error.
    pub fn fail(self, reason: &str) {
        let _ = self.to_client.send(Err(Error::connection_lost(reason)));
    }

    pub async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("client hung up")
    }

    /// Returns `None` once the client drops its end.
    pub async fn recv_or_closed(&mut self) -> Option<Frame> {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    pub async fn recv_message(&mut self) -> NamedMessage {
        match self.recv().await {
            Frame::Text(text) => NamedMessage::parse(&text).expect("named message"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    pub async fn recv_request(&mut self) -> RpcRequest {
        let message = self.recv_message().await;
        assert!(message.is_rpc(), "expected an RPC request, got {message:?}");
        RpcRequest::from_payload(&message.payload).expect("request")
    }

    pub async fn recv_binary(&mut self) -> Vec<u8> {
        match self.recv().await {
            Frame::Binary(data) => data,
            other => panic!("expected binary, got {other:?}"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Polls `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_open(client: &Client) {
    wait_until(|| client.status().is_open()).await;
}

/// Installs a log subscriber once; controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
