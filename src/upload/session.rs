//! Sliding-window upload state.
//!
//! Pure bookkeeping: no I/O, no locks. The controller feeds acks in and
//! writes out whatever [`UploadSession::next_frames`] returns.

// ============================================================================
// Imports
// ============================================================================

use tracing::warn;

use crate::error::{Error, Result};
use crate::protocol::BinaryFrame;

// ============================================================================
// Constants
// ============================================================================

/// Payload bytes per frame.
pub const FRAME_SIZE: usize = 1400;

/// Maximum frames sent but not yet acknowledged.
pub const WINDOW: usize = 20;

// ============================================================================
// AckOutcome
// ============================================================================

/// Effect of one acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Accepted; more frames remain to send or to be acknowledged.
    Progress,
    /// Every frame was sent and acknowledged.
    Complete,
    /// Regressing or overshooting count; state unchanged.
    Ignored,
}

// ============================================================================
// UploadProgress
// ============================================================================

/// Snapshot of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Frames written to the connection.
    pub frames_sent: usize,
    /// Frames acknowledged by the device.
    pub frames_acked: usize,
    /// Frames in the whole upload.
    pub total_frames: usize,
    /// Bytes in the whole upload.
    pub total_bytes: usize,
}

impl UploadProgress {
    /// Acknowledged fraction in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        self.frames_acked as f64 / self.total_frames as f64
    }
}

// ============================================================================
// UploadSession
// ============================================================================

/// One buffer being uploaded frame by frame.
#[derive(Debug)]
pub struct UploadSession {
    data: Vec<u8>,
    total_frames: usize,
    frames_sent: usize,
    frames_acked: usize,
}

impl UploadSession {
    /// Creates a session for `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] for an empty buffer.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::usage("cannot upload an empty buffer"));
        }

        Ok(Self {
            total_frames: data.len().div_ceil(FRAME_SIZE),
            data,
            frames_sent: 0,
            frames_acked: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[inline]
    #[must_use]
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    #[inline]
    #[must_use]
    pub fn frames_acked(&self) -> usize {
        self.frames_acked
    }

    /// Frames sent but not yet acknowledged.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.frames_sent - self.frames_acked
    }

    /// Returns `true` once every frame has been handed out.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.frames_sent == self.total_frames
    }

    /// Returns `true` once every frame has been acknowledged.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_done() && self.frames_sent == self.frames_acked
    }

    /// Hands out frames until the window is full or the buffer is exhausted.
    pub fn next_frames(&mut self) -> Vec<BinaryFrame> {
        let mut frames = Vec::new();
        while !self.is_done() && self.in_flight() < WINDOW {
            frames.push(self.frame(self.frames_sent));
            self.frames_sent += 1;
        }
        frames
    }

    fn frame(&self, index: usize) -> BinaryFrame {
        let start = index * FRAME_SIZE;
        let end = (start + FRAME_SIZE).min(self.data.len());
        BinaryFrame::upload_chunk(self.data[start..end].to_vec(), index + 1 == self.total_frames)
    }

    /// Applies a cumulative acknowledgement of `count` frames.
    ///
    /// Counts below the current one or above the number sent are logged and
    /// ignored.
    pub fn acknowledge(&mut self, count: u64) -> AckOutcome {
        let count = usize::try_from(count).unwrap_or(usize::MAX);

        if count < self.frames_acked {
            warn!(count, acked = self.frames_acked, "Ignoring regressing upload ack");
            return AckOutcome::Ignored;
        }
        if count > self.frames_sent {
            warn!(count, sent = self.frames_sent, "Ignoring ack for frames not yet sent");
            return AckOutcome::Ignored;
        }

        self.frames_acked = count;
        if self.is_complete() {
            AckOutcome::Complete
        } else {
            AckOutcome::Progress
        }
    }

    /// Returns a progress snapshot.
    #[must_use]
    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            frames_sent: self.frames_sent,
            frames_acked: self.frames_acked,
            total_frames: self.total_frames,
            total_bytes: self.data.len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
