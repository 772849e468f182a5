//! Named text messages.
//!
//! Every text frame is a two-element JSON array `[name, payload]` where
//! `payload` is any JSON value. The name [`RPC_TAG`] is reserved for RPC
//! traffic and never reaches ordinary subscribers.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, from_str, to_string};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Reserved message name carrying RPC requests and responses.
pub const RPC_TAG: &str = "AJAX";

// ============================================================================
// NamedMessage
// ============================================================================

/// A named message on the text channel.
///
/// # Format
///
/// ```json
/// ["setled", {"id": 2, "on": true}]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMessage {
    /// Message name, looked up in the event registry.
    pub name: String,
    /// Message payload.
    pub payload: Value,
}

impl NamedMessage {
    /// Creates a named message.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Parses a raw text frame.
    ///
    /// A missing payload element is read as `null`.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not JSON
    /// - [`Error::Protocol`] if it is not an array starting with a string
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = from_str(raw)?;

        let Value::Array(mut items) = value else {
            return Err(Error::protocol("message is not an array"));
        };

        if items.is_empty() {
            return Err(Error::protocol("message array is empty"));
        }

        let payload = if items.len() > 1 {
            items.swap_remove(1)
        } else {
            Value::Null
        };

        match items.swap_remove(0) {
            Value::String(name) => Ok(Self { name, payload }),
            other => Err(Error::protocol(format!(
                "message name must be a string, got {other}"
            ))),
        }
    }

    /// Serializes to the text wire format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    pub fn to_wire(&self) -> Result<String> {
        Ok(to_string(&(&self.name, &self.payload))?)
    }

    /// Returns `true` if this message travels under the reserved RPC tag.
    #[inline]
    #[must_use]
    pub fn is_rpc(&self) -> bool {
        self.name == RPC_TAG
    }
}

// ============================================================================
// Tests
// ============================================================================
