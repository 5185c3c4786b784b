//! Message value and single-frame encode/decode.
//!
//! A [`Message`] is a type id plus an opaque body. Uses `bytes::Bytes` so
//! a message moves between queues without copying its body.
//!
//! # Example
//!
//! ```
//! use msgwire::protocol::{decode, encode, Decode, Message};
//!
//! let message = Message::new(1, &b"abc"[..]);
//! let bytes = encode(&message).unwrap();
//!
//! match decode(&bytes, u32::MAX).unwrap() {
//!     Decode::Complete { message: decoded, consumed } => {
//!         assert_eq!(decoded, message);
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     Decode::NeedMoreData => unreachable!(),
//! }
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, ABSOLUTE_MAX_PAYLOAD_SIZE, HEADER_SIZE, KEEP_ALIVE_TYPE_ID};
use crate::error::{IpcError, Result};

/// A typed, immutable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    type_id: u32,
    body: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(type_id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            body: body.into(),
        }
    }

    /// Create a message by copying a byte slice.
    pub fn from_slice(type_id: u32, body: &[u8]) -> Self {
        Self {
            type_id,
            body: Bytes::copy_from_slice(body),
        }
    }

    #[inline]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a clone of the body as Bytes (cheap, zero-copy).
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.type_id == KEEP_ALIVE_TYPE_ID
    }

    /// Consume the message, returning type id and body.
    pub fn into_parts(self) -> (u32, Bytes) {
        (self.type_id, self.body)
    }

    /// Build the wire header for this message.
    ///
    /// Fails with `PayloadTooLarge` if the body does not fit a u32 length.
    pub fn header(&self) -> Result<Header> {
        let length = u32::try_from(self.body.len()).map_err(|_| IpcError::PayloadTooLarge {
            size: self.body.len(),
            max: ABSOLUTE_MAX_PAYLOAD_SIZE as usize,
        })?;
        Ok(Header::new(length, self.type_id))
    }
}

/// Result of a stateless decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// A full frame was present at the front of the buffer.
    Complete { message: Message, consumed: usize },
    /// Header or body is still incomplete; keep the bytes and retry later.
    NeedMoreData,
}

/// Encode a message as one contiguous frame.
pub fn encode(message: &Message) -> Result<Bytes> {
    let header = message.header()?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + message.len());
    buf.put_slice(&header.encode());
    buf.put_slice(message.body());
    Ok(buf.freeze())
}

/// Decode the frame at the front of `buf`.
///
/// Never consumes anything itself; on `Complete` the caller drops
/// `consumed` bytes from the front and keeps the suffix.
pub fn decode(buf: &[u8], max_payload_size: u32) -> Result<Decode> {
    let Some(header) = Header::decode(buf) else {
        return Ok(Decode::NeedMoreData);
    };
    header.validate(max_payload_size)?;

    let frame_len = header.frame_len();
    if buf.len() < frame_len {
        return Ok(Decode::NeedMoreData);
    }

    Ok(Decode::Complete {
        message: Message::from_slice(header.type_id, &buf[HEADER_SIZE..frame_len]),
        consumed: frame_len,
    })
}
