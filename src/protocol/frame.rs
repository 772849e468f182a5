//! Binary frame encoding.
//!
//! A binary message is one type-tag byte followed by an opaque payload.
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `1` | upload data chunk |
//! | `2` | upload data chunk, end of stream |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// FrameTag
// ============================================================================

/// Binary message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    /// Upload chunk.
    Upload = 1,
    /// Final upload chunk.
    UploadEof = 2,
}

impl FrameTag {
    /// Returns the wire byte.
    #[inline]
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameTag {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Upload),
            2 => Ok(Self::UploadEof),
            other => Err(Error::protocol(format!("unknown binary frame tag {other}"))),
        }
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::UploadEof => f.write_str("upload-eof"),
        }
    }
}

// ============================================================================
// BinaryFrame
// ============================================================================

/// A tagged binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    /// Type tag.
    pub tag: FrameTag,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl BinaryFrame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(tag: FrameTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// Creates an upload chunk, tagged end-of-stream when `eof` is set.
    #[inline]
    #[must_use]
    pub fn upload_chunk(payload: Vec<u8>, eof: bool) -> Self {
        let tag = if eof {
            FrameTag::UploadEof
        } else {
            FrameTag::Upload
        };
        Self::new(tag, payload)
    }

    /// Returns `true` for the final chunk of a stream.
    #[inline]
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.tag == FrameTag::UploadEof
    }

    /// Encodes the frame: tag byte, then payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        bytes.push(self.tag.as_byte());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an empty buffer or unknown tag.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::protocol("empty binary frame"))?;

        Ok(Self::new(FrameTag::try_from(tag)?, payload.to_vec()))
    }
}

// ============================================================================
// Tests
// ============================================================================
