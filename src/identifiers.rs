//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Scope |
//! |------|-------|
//! | [`CorrelationId`] | RPC request/response pairing, unique among pending calls |
//! | [`SubscriptionId`] | Handle returned by [`crate::EventBus::subscribe`] |
//! | [`PeerId`] | Publisher id of the device on an overlay session |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// CorrelationId
// ============================================================================

/// Token binding an RPC response to its originating request.
///
/// Encoded on the wire as a plain JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u32);

impl CorrelationId {
    /// Creates a correlation id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the id following this one, wrapping at `u32::MAX`.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Opaque handle for a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// PeerId
// ============================================================================

/// Overlay session publisher id.
///
/// Zero means "not yet known".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PeerId(u32);

impl PeerId {
    /// The unknown peer.
    pub const UNKNOWN: Self = Self(0);

    /// Creates a peer id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` once the device has published at least once.
    #[inline]
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_wraps() {
        assert_eq!(CorrelationId::new(u32::MAX).next(), CorrelationId::new(0));
        assert_eq!(CorrelationId::new(41).next().get(), 42);
    }

    #[test]
    fn test_correlation_id_is_json_number() {
        let json = serde_json::to_string(&CorrelationId::new(17)).expect("serialize");
        assert_eq!(json, "17");
    }

    #[test]
    fn test_peer_id_known() {
        assert!(!PeerId::UNKNOWN.is_known());
        assert!(PeerId::new(5).is_known());
        assert_eq!(PeerId::new(0x1f).to_string(), "0x0000001f");
    }
}
