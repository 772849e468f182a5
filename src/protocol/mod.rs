//! Device wire protocol.
//!
//! This module defines the message formats exchanged with the device over
//! the text and binary channels.
//!
//! # Protocol Overview
//!
//! | Message | Channel | Shape |
//! |---------|---------|-------|
//! | [`NamedMessage`] | text | `[name, payload]` |
//! | [`RpcRequest`] | text | `["AJAX", [service, id, args]]` |
//! | [`RpcResponse`] | text | `["AJAX", [id, {"success": v} \| {"error": e}]]` |
//! | [`BinaryFrame`] | binary | `[tag, payload...]` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Named text messages and the reserved RPC tag |
//! | `rpc` | RPC request/response payloads |
//! | `frame` | Binary frame type tags |
//! | `device` | Typed device messages (`nonce`, `auth`, `setled`, ...) |

// ============================================================================
// Submodules
// ============================================================================

/// Typed named messages understood by the device.
pub mod device;

/// Binary frame encoding.
pub mod frame;

/// Named text messages.
pub mod message;

/// RPC request and response payloads.
pub mod rpc;

// ============================================================================
// Re-exports
// ============================================================================

pub use device::{
    AuthRequest, DeviceMessage, DeviceName, Led, LedInfo, Nonce, SetLed, Temperature, UploadAck,
};
pub use frame::{BinaryFrame, FrameTag};
pub use message::{NamedMessage, RPC_TAG};
pub use rpc::{RpcEnvelope, RpcRequest, RpcResponse};
