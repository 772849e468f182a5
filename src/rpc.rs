//! Request/response correlation over the text channel.
//!
//! Each call is sent as `["AJAX", [service, id, args]]` and parked in the
//! pending map under its correlation id until the matching
//! `["AJAX", [id, {success | error}]]` arrives. Responses may arrive in any
//! order.
//!
//! A pending call completes exactly once: with the device's answer, with
//! [`Error::ConnectionLost`] when the link goes down, or with
//! [`Error::RequestTimeout`] when the caller chose a deadline.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{RpcRequest, RpcResponse};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending calls before new ones are rejected.
const MAX_PENDING_REQUESTS: usize = 256;

// ============================================================================
// Types
// ============================================================================

struct PendingCall {
    service: String,
    reply: oneshot::Sender<Result<Value>>,
}

struct Pending {
    next_id: CorrelationId,
    calls: FxHashMap<CorrelationId, PendingCall>,
}

// ============================================================================
// RpcChannel
// ============================================================================

/// Tracks outstanding calls and resolves them from device responses.
pub struct RpcChannel {
    connection: Connection,
    pending: Mutex<Pending>,
}

impl RpcChannel {
    /// Creates a channel sending through `connection`.
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection,
            pending: Mutex::new(Pending {
                next_id: CorrelationId::new(1),
                calls: FxHashMap::default(),
            }),
        }
    }

    /// Calls `service` on the device and waits for its answer.
    ///
    /// There is no deadline; the call ends when the device answers or the
    /// link is lost.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the connection is not open
    /// - [`Error::Rpc`] if the device reports an error
    /// - [`Error::ConnectionLost`] if the link drops first
    /// - [`Error::Protocol`] if too many calls are pending
    pub async fn call(&self, service: &str, args: Vec<Value>) -> Result<Value> {
        let (_, reply) = self.begin(service, args)?;
        reply
            .await
            .map_err(|_| Error::connection_lost("RPC channel dropped"))?
    }

    /// Like [`RpcChannel::call`], giving up after `deadline`.
    ///
    /// A late response for an expired call is logged and dropped.
    ///
    /// # Errors
    ///
    /// As [`RpcChannel::call`], plus [`Error::RequestTimeout`].
    pub async fn call_with_timeout(
        &self,
        service: &str,
        args: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value> {
        let (id, reply) = self.begin(service, args)?;

        match timeout(deadline, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::connection_lost("RPC channel dropped")),
            Err(_) => {
                self.pending.lock().calls.remove(&id);
                debug!(%id, service, "RPC call timed out");
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                Err(Error::request_timeout(id, deadline_ms))
            }
        }
    }

    /// Registers a call and sends it.
    fn begin(
        &self,
        service: &str,
        args: Vec<Value>,
    ) -> Result<(CorrelationId, oneshot::Receiver<Result<Value>>)> {
        let mut pending = self.pending.lock();

        if pending.calls.len() >= MAX_PENDING_REQUESTS {
            warn!(
                pending = pending.calls.len(),
                max = MAX_PENDING_REQUESTS,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {}/{}",
                pending.calls.len(),
                MAX_PENDING_REQUESTS
            )));
        }

        // Skip ids still in use after wrap-around.
        let id = loop {
            let candidate = pending.next_id;
            pending.next_id = candidate.next();
            if !pending.calls.contains_key(&candidate) {
                break candidate;
            }
        };

        let request = RpcRequest::new(service, id, args);
        let (reply, receiver) = oneshot::channel();
        pending.calls.insert(
            id,
            PendingCall {
                service: service.to_string(),
                reply,
            },
        );

        if let Err(e) = self.connection.send_message(&request.to_message()) {
            pending.calls.remove(&id);
            return Err(e);
        }

        trace!(%id, service, "RPC call sent");
        Ok((id, receiver))
    }

    /// Completes the pending call named by a response payload.
    ///
    /// Responses that do not parse or match no pending call are logged and
    /// dropped.
    pub fn resolve(&self, payload: &Value) {
        let response = match RpcResponse::from_payload(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Invalid RPC response");
                return;
            }
        };

        let Some(call) = self.pending.lock().calls.remove(&response.id) else {
            warn!(id = %response.id, "RPC response for unknown request");
            return;
        };

        let result = response
            .envelope
            .into_outcome()
            .map_err(|error| Error::rpc(call.service.as_str(), error));

        trace!(id = %response.id, service = %call.service, ok = result.is_ok(), "RPC resolved");
        if call.reply.send(result).is_err() {
            debug!(id = %response.id, "RPC caller no longer waiting");
        }
    }

    /// Fails every pending call with [`Error::ConnectionLost`].
    pub fn reject_all(&self, reason: &str) {
        let calls: Vec<_> = self.pending.lock().calls.drain().collect();
        if calls.is_empty() {
            return;
        }

        debug!(count = calls.len(), %reason, "Failing pending RPC calls");
        for (id, call) in calls {
            if call.reply.send(Err(Error::connection_lost(reason))).is_err() {
                debug!(%id, "RPC caller no longer waiting");
            }
        }
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    use crate::connection::{ConnectionCommand, ConnectionState};
    use crate::protocol::NamedMessage;

    fn sent_request(rx: &mut UnboundedReceiver<ConnectionCommand>) -> RpcRequest {
        match rx.try_recv() {
            Ok(ConnectionCommand::Text(text)) => {
                let message = NamedMessage::parse(&text).expect("named message");
                assert!(message.is_rpc());
                RpcRequest::from_payload(&message.payload).expect("request")
            }
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_call_resolves_with_success() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("math/add", vec![json!(2), json!(3)]));
        assert_pending!(call.poll());

        let request = sent_request(&mut rx);
        assert_eq!(request.service, "math/add");
        assert_eq!(request.args, vec![json!(2), json!(3)]);
        assert_eq!(rpc.pending_count(), 1);

        rpc.resolve(&json!([request.id, {"success": 5}]));

        assert!(call.is_woken());
        assert_eq!(assert_ready!(call.poll()).expect("result"), json!(5));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[test]
    fn test_out_of_order_responses() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut first = task::spawn(rpc.call("a", vec![]));
        let mut second = task::spawn(rpc.call("b", vec![]));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        let first_req = sent_request(&mut rx);
        let second_req = sent_request(&mut rx);
        assert_ne!(first_req.id, second_req.id);

        rpc.resolve(&json!([second_req.id, {"success": "B"}]));
        assert_eq!(assert_ready!(second.poll()).expect("b"), json!("B"));
        assert_pending!(first.poll());

        rpc.resolve(&json!([first_req.id, {"success": "A"}]));
        assert_eq!(assert_ready!(first.poll()).expect("a"), json!("A"));
    }

    #[test]
    fn test_error_envelope_rejects() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("led/set", vec![json!(9)]));
        assert_pending!(call.poll());
        let request = sent_request(&mut rx);

        rpc.resolve(&json!([request.id, {"err": "no such led"}]));

        let err = assert_ready!(call.poll()).unwrap_err();
        assert_eq!(err.rpc_error(), Some(&json!("no such led")));
        assert!(err.to_string().contains("led/set"));
    }

    #[test]
    fn test_null_success_is_failure() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("x", vec![]));
        assert_pending!(call.poll());
        let request = sent_request(&mut rx);

        rpc.resolve(&json!([request.id, {"success": null}]));

        assert!(matches!(assert_ready!(call.poll()), Err(Error::Rpc { .. })));
    }

    #[test]
    fn test_unknown_and_malformed_responses_ignored() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("x", vec![]));
        assert_pending!(call.poll());
        let request = sent_request(&mut rx);

        rpc.resolve(&json!([request.id.get() + 100, {"success": 1}]));
        rpc.resolve(&json!([request.id, "not an object"]));
        rpc.resolve(&json!("garbage"));

        assert_pending!(call.poll());
        assert_eq!(rpc.pending_count(), 1);
    }

    #[test]
    fn test_second_response_for_same_id_ignored() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("x", vec![]));
        assert_pending!(call.poll());
        let request = sent_request(&mut rx);

        rpc.resolve(&json!([request.id, {"success": 1}]));
        rpc.resolve(&json!([request.id, {"success": 2}]));

        assert_eq!(assert_ready!(call.poll()).expect("first"), json!(1));
    }

    #[test]
    fn test_reject_all_on_loss() {
        let (connection, _rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut a = task::spawn(rpc.call("a", vec![]));
        let mut b = task::spawn(rpc.call("b", vec![]));
        assert_pending!(a.poll());
        assert_pending!(b.poll());

        rpc.reject_all("device rebooted");

        for result in [assert_ready!(a.poll()), assert_ready!(b.poll())] {
            match result {
                Err(Error::ConnectionLost { reason }) => assert_eq!(reason, "device rebooted"),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(rpc.pending_count(), 0);
    }

    #[test]
    fn test_reject_all_with_abandoned_caller() {
        let (connection, _rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let mut abandoned = task::spawn(rpc.call("a", vec![]));
        let mut waiting = task::spawn(rpc.call("b", vec![]));
        assert_pending!(abandoned.poll());
        assert_pending!(waiting.poll());
        drop(abandoned);

        rpc.reject_all("device rebooted");

        assert!(matches!(
            assert_ready!(waiting.poll()),
            Err(Error::ConnectionLost { .. })
        ));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[test]
    fn test_call_rejected_when_not_open() {
        let (connection, _rx) = Connection::open_for_test();
        connection.set_state(ConnectionState::Connecting);
        let rpc = RpcChannel::new(connection);

        let mut call = task::spawn(rpc.call("x", vec![]));
        let err = assert_ready!(call.poll()).unwrap_err();
        assert!(matches!(err, Error::NotOpen { .. }));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[test]
    fn test_ids_skip_those_in_use() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);
        rpc.pending.lock().next_id = CorrelationId::new(u32::MAX);

        let mut a = task::spawn(rpc.call("a", vec![]));
        assert_pending!(a.poll());
        assert_eq!(sent_request(&mut rx).id, CorrelationId::new(u32::MAX));

        rpc.pending.lock().next_id = CorrelationId::new(u32::MAX);
        let mut b = task::spawn(rpc.call("b", vec![]));
        assert_pending!(b.poll());
        assert_ne!(sent_request(&mut rx).id, CorrelationId::new(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_releases_id() {
        let (connection, mut rx) = Connection::open_for_test();
        let rpc = RpcChannel::new(connection);

        let err = rpc
            .call_with_timeout("slow", vec![], Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("500ms"), "{err}");
        assert_eq!(rpc.pending_count(), 0);

        // A late answer is dropped without effect.
        let request = sent_request(&mut rx);
        rpc.resolve(&json!([request.id, {"success": true}]));
        assert_eq!(rpc.pending_count(), 0);
    }
}
