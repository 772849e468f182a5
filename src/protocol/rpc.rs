//! RPC request and response payloads.
//!
//! RPC calls are carried as named messages under [`RPC_TAG`].
//!
//! # Format
//!
//! Request (client to device):
//! ```json
//! ["AJAX", ["math/add", 17, [2, 3]]]
//! ```
//!
//! Response (device to client):
//! ```json
//! ["AJAX", [17, {"success": 5}]]
//! ["AJAX", [17, {"error": "division by zero"}]]
//! ```
//!
//! Device firmware may spell the envelope keys `rsp` and `err`; both
//! spellings are accepted.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, json};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

use super::message::{NamedMessage, RPC_TAG};

// ============================================================================
// Helpers
// ============================================================================

fn parse_id(value: Option<&Value>) -> Result<CorrelationId> {
    value
        .and_then(Value::as_u64)
        .and_then(|raw| u32::try_from(raw).ok())
        .map(CorrelationId::new)
        .ok_or_else(|| Error::protocol("RPC correlation id must be an unsigned 32-bit number"))
}

// ============================================================================
// RpcRequest
// ============================================================================

/// An RPC call from client to device.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Service name, e.g. `math/add`.
    pub service: String,
    /// Correlation id.
    pub id: CorrelationId,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl RpcRequest {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(service: impl Into<String>, id: CorrelationId, args: Vec<Value>) -> Self {
        Self {
            service: service.into(),
            id,
            args,
        }
    }

    /// Wraps the request in a named message under the reserved tag.
    #[must_use]
    pub fn to_message(&self) -> NamedMessage {
        NamedMessage::new(RPC_TAG, json!([self.service, self.id, self.args]))
    }

    /// Parses a request payload `[service, id, args]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload shape is wrong.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let items = payload
            .as_array()
            .ok_or_else(|| Error::protocol("RPC request payload is not an array"))?;

        let service = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("RPC request service must be a string"))?;

        let id = parse_id(items.get(1))?;

        let args = match items.get(2) {
            Some(Value::Array(args)) => args.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => return Err(Error::protocol("RPC request args must be an array")),
        };

        Ok(Self::new(service, id, args))
    }
}

// ============================================================================
// RpcEnvelope
// ============================================================================

/// Outcome part of an RPC response.
///
/// Exactly one of `success` / `error` is meaningful. A `null` success is
/// treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Result value on success.
    #[serde(default, alias = "rsp", skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,

    /// Error value on failure.
    #[serde(default, alias = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcEnvelope {
    /// Creates a success envelope.
    #[inline]
    #[must_use]
    pub fn success(value: Value) -> Self {
        Self {
            success: Some(value),
            error: None,
        }
    }

    /// Creates an error envelope.
    #[inline]
    #[must_use]
    pub fn failure(error: Value) -> Self {
        Self {
            success: None,
            error: Some(error),
        }
    }

    /// Splits the envelope into the resolved value or the rejection value.
    ///
    /// A missing error on a non-success envelope rejects with `null`.
    pub fn into_outcome(self) -> std::result::Result<Value, Value> {
        match self.success {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(self.error.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// RpcResponse
// ============================================================================

/// An RPC response from device to client.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Correlation id of the originating request.
    pub id: CorrelationId,
    /// Result or error.
    pub envelope: RpcEnvelope,
}

impl RpcResponse {
    /// Creates a response.
    #[inline]
    #[must_use]
    pub fn new(id: CorrelationId, envelope: RpcEnvelope) -> Self {
        Self { id, envelope }
    }

    /// Parses a response payload `[id, envelope]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is not an array, the id is
    /// not a number or the envelope is not an object.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let items = payload
            .as_array()
            .ok_or_else(|| Error::protocol("RPC response payload is not an array"))?;

        let id = parse_id(items.first())?;

        let envelope = match items.get(1) {
            Some(envelope @ Value::Object(_)) => from_value(envelope.clone())?,
            _ => return Err(Error::protocol("RPC response envelope is not an object")),
        };

        Ok(Self { id, envelope })
    }

    /// Wraps the response in a named message under the reserved tag.
    #[must_use]
    pub fn to_message(&self) -> NamedMessage {
        NamedMessage::new(RPC_TAG, json!([self.id, self.envelope]))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = RpcRequest::new("math/add", CorrelationId::new(9), vec![json!(2), json!(3)]);
        let wire = request.to_message().to_wire().expect("serialize");
        assert_eq!(wire, r#"["AJAX",["math/add",9,[2,3]]]"#);
    }

    #[test]
    fn test_request_from_payload() {
        let request =
            RpcRequest::from_payload(&json!(["math/mul", 4, [1.5, 2]])).expect("parse");
        assert_eq!(request.service, "math/mul");
        assert_eq!(request.id, CorrelationId::new(4));
        assert_eq!(request.args, vec![json!(1.5), json!(2)]);
    }

    #[test]
    fn test_response_success() {
        let response = RpcResponse::from_payload(&json!([3, {"success": 5}])).expect("parse");
        assert_eq!(response.id, CorrelationId::new(3));
        assert_eq!(response.envelope.into_outcome(), Ok(json!(5)));
    }

    #[test]
    fn test_response_firmware_spelling() {
        let ok = RpcResponse::from_payload(&json!([3, {"rsp": 1.25}])).expect("parse");
        assert_eq!(ok.envelope.into_outcome(), Ok(json!(1.25)));

        let err = RpcResponse::from_payload(&json!([3, {"err": "nope"}])).expect("parse");
        assert_eq!(err.envelope.into_outcome(), Err(json!("nope")));
    }

    #[test]
    fn test_null_success_rejects() {
        let response =
            RpcResponse::from_payload(&json!([1, {"success": null, "error": "bad"}]))
                .expect("parse");
        assert_eq!(response.envelope.into_outcome(), Err(json!("bad")));
    }

    #[test]
    fn test_empty_envelope_rejects_with_null() {
        let response = RpcResponse::from_payload(&json!([1, {}])).expect("parse");
        assert_eq!(response.envelope.into_outcome(), Err(Value::Null));
    }

    #[test]
    fn test_response_rejects_non_object_envelope() {
        assert!(RpcResponse::from_payload(&json!([1, 5])).is_err());
        assert!(RpcResponse::from_payload(&json!([1])).is_err());
        assert!(RpcResponse::from_payload(&json!({"id": 1})).is_err());
    }

    #[test]
    fn test_response_rejects_bad_id() {
        assert!(RpcResponse::from_payload(&json!(["x", {"success": 1}])).is_err());
        assert!(RpcResponse::from_payload(&json!([-1, {"success": 1}])).is_err());
    }

    #[test]
    fn test_response_to_message() {
        let response = RpcResponse::new(CorrelationId::new(2), RpcEnvelope::success(json!(5)));
        let wire = response.to_message().to_wire().expect("serialize");
        assert_eq!(wire, r#"["AJAX",[2,{"success":5}]]"#);
    }
}
