//! Wire format encoding and decoding.
//!
//! Implements the 8-byte frame header:
//! ```text
//! ┌──────────┬──────────┬─────────────────┐
//! │ Length   │ Type ID  │ Body            │
//! │ 4 bytes  │ 4 bytes  │ Length bytes    │
//! │ uint32 BE│ uint32 BE│                 │
//! └──────────┴──────────┴─────────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `Length` counts the body only;
//! the type id is not included.

use crate::error::{IpcError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum body size accepted from a peer (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum body size representable on the wire.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = u32::MAX;

/// Reserved type id for keep-alive frames (always empty, never delivered).
pub const KEEP_ALIVE_TYPE_ID: u32 = 0;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Body length in bytes.
    pub payload_length: u32,
    /// Message type discriminator.
    pub type_id: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(payload_length: u32, type_id: u32) -> Self {
        Self {
            payload_length,
            type_id,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use msgwire::protocol::Header;
    ///
    /// let bytes = Header::new(3, 1).encode();
    /// assert_eq!(bytes, [0, 0, 0, 3, 0, 0, 0, 1]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.type_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            payload_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            type_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header against the receive limit.
    ///
    /// An implausible length means the stream is out of sync, so this is
    /// reported as `FrameCorrupt` rather than a size error.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(IpcError::FrameCorrupt(format!(
                "declared length {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.is_keep_alive() && self.payload_length != 0 {
            return Err(IpcError::FrameCorrupt(format!(
                "keep-alive frame carries {} body bytes",
                self.payload_length
            )));
        }

        Ok(())
    }

    /// Check if this is a keep-alive frame.
    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.type_id == KEEP_ALIVE_TYPE_ID
    }

    /// Total frame size on the wire (header + body).
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}
