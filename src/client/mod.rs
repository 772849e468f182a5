//! Client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Session context: connection, events, RPC, upload |
//! | [`ClientBuilder`] | Transport selection and configuration |
//! | [`ClientOptions`] | Endpoints, timeouts, reconnection policy |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Session context.
pub mod core;

/// Connection settings.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::Client;
pub use options::ClientOptions;
