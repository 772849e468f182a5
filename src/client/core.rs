//! Client session context.
//!
//! One [`Client`] owns one logical connection and the components sharing
//! it. It is cheap to clone; clones share the session.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::connection::{Connection, ConnectionManager, ConnectionState};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, Topic};
use crate::identifiers::SubscriptionId;
use crate::protocol::{BinaryFrame, DeviceMessage};
use crate::rpc::RpcChannel;
use crate::transport::Transport;
use crate::upload::{UploadController, UploadOutcome, UploadProgress};

use super::builder::ClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// Client
// ============================================================================

/// Control client for one device.
///
/// # Example
///
/// ```no_run
/// use device_link::{Client, Result};
/// use serde_json::json;
///
/// # async fn example() -> Result<()> {
/// let client = Client::builder().page_url("http://192.168.1.20/").build()?;
///
/// client.on_open(|| println!("connected"));
/// client.on_message("settemp", |payload| println!("temp: {payload}"))?;
/// client.connect()?;
///
/// let sum = client.call("math/add", vec![json!(2), json!(3)]).await?;
/// assert_eq!(sum, json!(5));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connection: Connection,
    bus: Arc<EventBus>,
    rpc: Arc<RpcChannel>,
    uploads: UploadController,
    manager: ConnectionManager,
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let connection = Connection::new();
        let rpc = Arc::new(RpcChannel::new(connection.clone()));
        let bus = Arc::new(EventBus::new(Arc::clone(&rpc)));
        let uploads = UploadController::new(connection.clone(), Arc::clone(&bus));
        let manager = ConnectionManager::new(
            transport,
            options.reconnect,
            options.connect_timeout,
            connection.clone(),
            Arc::clone(&bus),
            Arc::clone(&rpc),
        );

        Self {
            inner: Arc::new(ClientInner {
                connection,
                bus,
                rpc,
                uploads,
                manager,
            }),
        }
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Starts connecting. Calling it again while running has no effect.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReconnectable`] if an overlay session was already
    /// used.
    pub fn connect(&self) -> Result<()> {
        self.inner.manager.connect()
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.inner.connection.status()
    }

    /// Stops the connection task.
    ///
    /// Pending calls are rejected, a running upload fails and subscribers
    /// receive `close` with `will_reconnect == false`.
    pub async fn shutdown(&self) {
        self.inner.manager.shutdown().await;
    }
}

// ============================================================================
// Client - Events
// ============================================================================

impl Client {
    /// Registers `handler` for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] for an empty or reserved message name.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(topic, handler)
    }

    /// Removes a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if `id` is not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.bus.unsubscribe(id)
    }

    /// Calls `handler` each time the connection opens.
    pub fn on_open<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.bus.insert(
            Topic::Open,
            Arc::new(move |event: &Event<'_>| {
                if matches!(event, Event::Open) {
                    handler();
                }
            }),
        )
    }

    /// Calls `handler(will_reconnect, reason)` each time the connection
    /// closes.
    pub fn on_close<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(bool, &str) + Send + Sync + 'static,
    {
        self.inner.bus.insert(
            Topic::Close,
            Arc::new(move |event: &Event<'_>| {
                if let Event::Close {
                    will_reconnect,
                    reason,
                } = event
                {
                    handler(*will_reconnect, *reason);
                }
            }),
        )
    }

    /// Calls `handler(payload)` for each device message named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] for an empty or reserved name.
    pub fn on_message<F>(&self, name: impl Into<String>, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(Topic::message(name), move |event| {
            if let Event::Message { payload, .. } = event {
                handler(*payload);
            }
        })
    }

    /// Calls `handler` with each decoded `T` message.
    ///
    /// Payloads that do not decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if `T::NAME` is reserved.
    pub fn on_device_message<T, F>(&self, handler: F) -> Result<SubscriptionId>
    where
        T: DeviceMessage + DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_message(T::NAME, move |payload| match T::from_payload(payload) {
            Ok(message) => handler(message),
            Err(e) => warn!(name = T::NAME, error = %e, "Undecodable device message"),
        })
    }
}

// ============================================================================
// Client - Messaging
// ============================================================================

impl Client {
    /// Calls `service` on the device and waits for the answer.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the connection is not open
    /// - [`Error::Rpc`] carrying the device's error value
    /// - [`Error::ConnectionLost`] if the connection drops first
    pub async fn call(&self, service: &str, args: Vec<Value>) -> Result<Value> {
        self.inner.rpc.call(service, args).await
    }

    /// Like [`Client::call`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`Client::call`], plus [`Error::RequestTimeout`].
    pub async fn call_with_timeout(
        &self,
        service: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.inner.rpc.call_with_timeout(service, args, timeout).await
    }

    /// Returns the number of calls awaiting an answer.
    #[inline]
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.rpc.pending_count()
    }

    /// Sends `[name, payload]` without expecting an answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if the connection is not open.
    pub fn send_json(&self, name: impl Into<String>, payload: Value) -> Result<()> {
        self.inner.connection.send_json(name, payload)
    }

    /// Sends a typed device message.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the connection is not open
    /// - [`Error::Json`] if the message does not serialize
    pub fn send_message<T>(&self, message: &T) -> Result<()>
    where
        T: DeviceMessage + Serialize,
    {
        self.inner.connection.send_message(&message.to_message()?)
    }

    /// Sends one tagged binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if the connection is not open.
    pub fn send_binary(&self, frame: &BinaryFrame) -> Result<()> {
        self.inner.connection.send_binary(frame)
    }
}

// ============================================================================
// Client - Upload
// ============================================================================

impl Client {
    /// Starts uploading `data`; `on_complete` runs once when it ends.
    ///
    /// # Errors
    ///
    /// - [`Error::Usage`] if an upload is running or `data` is empty
    /// - [`Error::NotOpen`] if the connection is not open
    pub fn start_upload<F>(&self, data: Vec<u8>, on_complete: F) -> Result<()>
    where
        F: FnOnce(UploadOutcome) + Send + 'static,
    {
        self.inner.uploads.start(data, on_complete)
    }

    /// Uploads `data` and waits for the outcome.
    ///
    /// A lost connection yields `Ok(UploadOutcome::Failed { .. })`.
    ///
    /// # Errors
    ///
    /// As [`Client::start_upload`].
    pub async fn upload(&self, data: Vec<u8>) -> Result<UploadOutcome> {
        let (tx, rx) = oneshot::channel();
        self.start_upload(data, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        rx.await.map_err(Error::from)
    }

    /// Returns progress of the running upload.
    #[must_use]
    pub fn upload_progress(&self) -> Option<UploadProgress> {
        self.inner.uploads.progress()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("manager", &self.inner.manager)
            .field("pending_calls", &self.pending_calls())
            .finish_non_exhaustive()
    }
}
