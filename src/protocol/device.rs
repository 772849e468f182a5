//! Typed device messages.
//!
//! The device speaks a small set of named messages besides RPC. Each type
//! here implements [`DeviceMessage`], binding it to its wire name so it can
//! be sent with [`crate::Client::send_message`] and received with
//! [`crate::Client::on_device_message`].
//!
//! | Name | Direction | Payload |
//! |------|-----------|---------|
//! | `nonce` | device → client | base64 challenge |
//! | `auth` | client → device | `{name, hash}` |
//! | `devname` | device → client | `["name"]` |
//! | `ledinfo` | device → client | `{leds: [{name, id, color, on}]}` |
//! | `setled` | both | `{id, on}` |
//! | `settemp` | device → client | temperature × 10 |
//! | `uploadack` | device → client | cumulative frame count |
//!
//! Hashing the credentials for `auth` is left to the caller.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::error::{Error, Result};

use super::message::NamedMessage;

// ============================================================================
// DeviceMessage
// ============================================================================

/// A payload type bound to a fixed message name.
pub trait DeviceMessage: Sized {
    /// Wire name of the message.
    const NAME: &'static str;

    /// Decodes the payload of a message with this name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload has the wrong shape.
    fn from_payload(payload: &Value) -> Result<Self>
    where
        Self: DeserializeOwned,
    {
        Ok(from_value(payload.clone())?)
    }

    /// Encodes into a named message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    fn to_message(&self) -> Result<NamedMessage>
    where
        Self: Serialize,
    {
        Ok(NamedMessage::new(Self::NAME, to_value(self)?))
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Login challenge sent by the device, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    /// Decodes the challenge bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the value is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.0.trim())
            .map_err(|e| Error::protocol(format!("invalid nonce encoding: {e}")))
    }
}

impl DeviceMessage for Nonce {
    const NAME: &'static str = "nonce";
}

/// Credentials answering a [`Nonce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// User name.
    pub name: String,
    /// Hex-encoded hash computed by the caller.
    pub hash: String,
}

impl AuthRequest {
    /// Creates an auth request.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

impl DeviceMessage for AuthRequest {
    const NAME: &'static str = "auth";
}

// ============================================================================
// Device Info
// ============================================================================

/// Device name, sent as a one-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DeviceNameWire", into = "DeviceNameWire")]
pub struct DeviceName {
    /// Display name.
    pub name: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DeviceNameWire {
    List((String,)),
    Bare(String),
}

impl From<DeviceNameWire> for DeviceName {
    fn from(wire: DeviceNameWire) -> Self {
        match wire {
            DeviceNameWire::List((name,)) | DeviceNameWire::Bare(name) => Self { name },
        }
    }
}

impl From<DeviceName> for DeviceNameWire {
    fn from(value: DeviceName) -> Self {
        Self::List((value.name,))
    }
}

impl DeviceMessage for DeviceName {
    const NAME: &'static str = "devname";
}

// ============================================================================
// LEDs
// ============================================================================

/// One LED as described by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Led {
    /// Label.
    pub name: String,
    /// LED id, used by [`SetLed`].
    pub id: u32,
    /// Color name.
    pub color: String,
    /// Current state.
    pub on: bool,
}

/// LED inventory, sent once the user is logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedInfo {
    /// All LEDs on the device.
    pub leds: Vec<Led>,
}

impl DeviceMessage for LedInfo {
    const NAME: &'static str = "ledinfo";
}

/// LED state change; sent by either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLed {
    /// LED id.
    pub id: u32,
    /// New state.
    pub on: bool,
}

impl DeviceMessage for SetLed {
    const NAME: &'static str = "setled";
}

// ============================================================================
// Telemetry
// ============================================================================

/// Temperature in tenths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(pub i32);

impl Temperature {
    /// Returns degrees Celsius.
    #[inline]
    #[must_use]
    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl DeviceMessage for Temperature {
    const NAME: &'static str = "settemp";
}

// ============================================================================
// Upload
// ============================================================================

/// Cumulative count of upload frames processed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadAck(pub u64);

impl DeviceMessage for UploadAck {
    const NAME: &'static str = "uploadack";
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_nonce_decode() {
        let nonce = Nonce::from_payload(&json!("AAEC/w==")).expect("parse");
        assert_eq!(nonce.decode().expect("decode"), vec![0, 1, 2, 255]);
    }

    #[test]
    fn test_nonce_rejects_bad_base64() {
        let nonce = Nonce("***".to_string());
        assert!(nonce.decode().is_err());
    }

    #[test]
    fn test_auth_message() {
        let message = AuthRequest::new("admin", "abc123").to_message().expect("encode");
        assert_eq!(message.name, "auth");
        assert_eq!(message.payload, json!({"name": "admin", "hash": "abc123"}));
    }

    #[test]
    fn test_device_name_both_shapes() {
        let listed = DeviceName::from_payload(&json!(["bench-01"])).expect("parse");
        let bare = DeviceName::from_payload(&json!("bench-01")).expect("parse");
        assert_eq!(listed, bare);
        assert_eq!(to_value(&listed).expect("encode"), json!(["bench-01"]));
    }

    #[test]
    fn test_led_info() {
        let info = LedInfo::from_payload(&json!({
            "leds": [
                {"name": "Power", "id": 1, "color": "red", "on": true},
                {"name": "Link", "id": 2, "color": "green", "on": false}
            ]
        }))
        .expect("parse");
        assert_eq!(info.leds.len(), 2);
        assert_eq!(info.leds[1].color, "green");
    }

    #[test]
    fn test_set_led_message() {
        let message = SetLed { id: 3, on: true }.to_message().expect("encode");
        assert_eq!(message.to_wire().expect("wire"), r#"["setled",{"id":3,"on":true}]"#);
    }

    #[test]
    fn test_temperature() {
        let temp = Temperature::from_payload(&json!(215)).expect("parse");
        assert!((temp.celsius() - 21.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_upload_ack() {
        assert_eq!(UploadAck::from_payload(&json!(10)).expect("parse"), UploadAck(10));
        assert!(UploadAck::from_payload(&json!("ten")).is_err());
    }
}
