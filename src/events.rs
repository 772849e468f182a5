//! Event registry and dispatch.
//!
//! Handlers subscribe to a [`Topic`]: the two lifecycle topics (`open`,
//! `close`) or a device message name. Incoming text frames are parsed here
//! and routed:
//!
//! ```text
//! text frame ──► parse [name, payload]
//!                  │
//!                  ├── name == "AJAX" ──► RpcChannel::resolve
//!                  ├── registered     ──► handlers, in registration order
//!                  └── unknown        ──► logged, dropped
//! ```
//!
//! Handlers are called outside the registry lock, so a handler may
//! subscribe or unsubscribe (itself included) while it runs. A handler added
//! during a dispatch first runs on the next one; a handler removed during a
//! dispatch is not called again, even by the dispatch in progress.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{NamedMessage, RPC_TAG};
use crate::rpc::RpcChannel;

// ============================================================================
// Topic
// ============================================================================

/// What a handler listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The connection became open.
    Open,
    /// The connection closed or was lost.
    Close,
    /// A device message with this name.
    Message(String),
}

impl Topic {
    /// Topic for a device message name.
    #[inline]
    #[must_use]
    pub fn message(name: impl Into<String>) -> Self {
        Self::Message(name.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Close => f.write_str("close"),
            Self::Message(name) => write!(f, "message:{name}"),
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// An event as seen by a handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event<'a> {
    /// The connection became open.
    Open,
    /// The connection closed.
    Close {
        /// `true` while the client keeps retrying.
        will_reconnect: bool,
        /// Human-readable cause.
        reason: &'a str,
    },
    /// A device message.
    Message {
        /// Message name.
        name: &'a str,
        /// Message payload.
        payload: &'a Value,
    },
}

/// Lifecycle notification emitted by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// See [`Event::Open`].
    Open,
    /// See [`Event::Close`].
    Close {
        /// `true` while the client keeps retrying.
        will_reconnect: bool,
        /// Human-readable cause.
        reason: String,
    },
}

impl Lifecycle {
    fn topic(&self) -> Topic {
        match self {
            Self::Open => Topic::Open,
            Self::Close { .. } => Topic::Close,
        }
    }

    fn as_event(&self) -> Event<'_> {
        match self {
            Self::Open => Event::Open,
            Self::Close {
                will_reconnect,
                reason,
            } => Event::Close {
                will_reconnect: *will_reconnect,
                reason,
            },
        }
    }
}

/// Event handler callback.
pub type EventHandler = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

// ============================================================================
// Registry
// ============================================================================

/// A registered handler. `live` is cleared on unsubscribe so snapshots
/// taken by a running dispatch skip it.
#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
    live: Arc<AtomicBool>,
}

impl Subscription {
    fn call(&self, event: &Event<'_>) {
        if self.live.load(Ordering::Acquire) {
            (self.handler)(event);
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: FxHashMap<Topic, Vec<Subscription>>,
    index: FxHashMap<SubscriptionId, Topic>,
}

// ============================================================================
// EventBus
// ============================================================================

/// Routes lifecycle events and device messages to subscribers.
pub struct EventBus {
    registry: Mutex<Registry>,
    rpc: Arc<RpcChannel>,
}

impl EventBus {
    /// Creates a bus that hands RPC traffic to `rpc`.
    pub(crate) fn new(rpc: Arc<RpcChannel>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            rpc,
        }
    }

    /// Registers `handler` for `topic`.
    ///
    /// Handlers for the same topic run in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the message name is empty or is the
    /// reserved RPC name.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        if let Topic::Message(name) = &topic {
            if name.is_empty() {
                return Err(Error::usage("message name must not be empty"));
            }
            if name == RPC_TAG {
                return Err(Error::usage(format!(
                    "'{RPC_TAG}' is reserved for RPC responses"
                )));
            }
        }

        Ok(self.insert(topic, Arc::new(handler)))
    }

    /// Registers a handler without validating the topic.
    pub(crate) fn insert(&self, topic: Topic, handler: EventHandler) -> SubscriptionId {
        let mut registry = self.registry.lock();

        registry.next_id += 1;
        let id = SubscriptionId::new(registry.next_id);

        trace!(%id, %topic, "subscribe");
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push(Subscription {
                id,
                handler,
                live: Arc::new(AtomicBool::new(true)),
            });
        registry.index.insert(id, topic);

        id
    }

    /// Removes a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if `id` is not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut registry = self.registry.lock();

        let Some(topic) = registry.index.remove(&id) else {
            return Err(Error::usage(format!("unknown subscription {id}")));
        };

        if let Some(handlers) = registry.topics.get_mut(&topic) {
            handlers.retain(|subscription| {
                if subscription.id == id {
                    subscription.live.store(false, Ordering::Release);
                    return false;
                }
                true
            });
            if handlers.is_empty() {
                registry.topics.remove(&topic);
            }
        }

        trace!(%id, %topic, "unsubscribe");
        Ok(())
    }

    /// Number of handlers registered for `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.registry.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Delivers a lifecycle event to its subscribers.
    pub fn dispatch_lifecycle(&self, lifecycle: &Lifecycle) {
        let handlers = self.handlers_for(&lifecycle.topic());
        let event = lifecycle.as_event();

        debug!(event = ?event, handlers = handlers.len(), "Lifecycle event");
        for subscription in &handlers {
            subscription.call(&event);
        }
    }

    /// Parses one text frame and routes it.
    ///
    /// Malformed frames and unregistered names are logged and dropped.
    pub fn dispatch_incoming(&self, raw: &str) {
        let message = match NamedMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };

        if message.is_rpc() {
            self.rpc.resolve(&message.payload);
            return;
        }

        let handlers = self.handlers_for(&Topic::Message(message.name.clone()));
        if handlers.is_empty() {
            warn!(name = %message.name, "No handler for device message");
            return;
        }

        trace!(name = %message.name, handlers = handlers.len(), "dispatch");
        let event = Event::Message {
            name: &message.name,
            payload: &message.payload,
        };
        for subscription in &handlers {
            subscription.call(&event);
        }
    }

    fn handlers_for(&self, topic: &Topic) -> Vec<Subscription> {
        self.registry
            .lock()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventBus")
            .field("topics", &registry.topics.len())
            .field("subscriptions", &registry.index.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
