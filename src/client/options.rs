//! Client configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use device_link::{ClientOptions, ReconnectPolicy};
//!
//! let options = ClientOptions::new()
//!     .with_dev_url("ws://192.168.1.50/")
//!     .with_connect_timeout(Duration::from_secs(3))
//!     .with_reconnect(ReconnectPolicy::default().with_max_attempts(5));
//! assert_eq!(options.dev_url, "ws://192.168.1.50/");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::connection::ReconnectPolicy;
use crate::transport::selector::{DEFAULT_DEV_URL, DEFAULT_OVERLAY_PATH};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ClientOptions
// ============================================================================

/// Connection settings shared by both transport variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Endpoint used when no served page URL is configured.
    pub dev_url: String,

    /// Overlay session endpoint path on the device.
    pub overlay_path: String,

    /// Bound on one connection attempt, handshake included.
    pub connect_timeout: Duration,

    /// Reconnection schedule for the direct transport.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dev_url: DEFAULT_DEV_URL.to_string(),
            overlay_path: DEFAULT_OVERLAY_PATH.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the development fallback endpoint.
    #[inline]
    #[must_use]
    pub fn with_dev_url(mut self, url: impl Into<String>) -> Self {
        self.dev_url = url.into();
        self
    }

    /// Sets the overlay endpoint path.
    #[inline]
    #[must_use]
    pub fn with_overlay_path(mut self, path: impl Into<String>) -> Self {
        self.overlay_path = path.into();
        self
    }

    /// Sets the connection attempt timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
