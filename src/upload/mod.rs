//! Flow-controlled binary upload.
//!
//! A buffer is cut into frames of [`FRAME_SIZE`] bytes, each sent as a
//! tagged binary message (`1` = chunk, `2` = last chunk). The device
//! acknowledges with `["uploadack", n]`, `n` being the cumulative number of
//! frames it has processed. At most [`WINDOW`] frames are unacknowledged at
//! any time.
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Window bookkeeping, no I/O |
//! | [`controller`] | Wires a session to the connection and event bus |

// ============================================================================
// Submodules
// ============================================================================

pub mod controller;
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use controller::{CompletionCallback, UploadController, UploadOutcome};
pub use session::{AckOutcome, FRAME_SIZE, UploadProgress, UploadSession, WINDOW};
