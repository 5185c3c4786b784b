//! Stateful decoder for a byte stream of frames.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForBody`: Header parsed, need N more body bytes
//!
//! Reads need not line up with frame boundaries; leftovers are carried
//! across calls.
//!
//! # Example
//!
//! ```
//! use msgwire::protocol::{encode, FrameDecoder, Message};
//!
//! let bytes = encode(&Message::from_slice(7, b"hello")).unwrap();
//! let mut decoder = FrameDecoder::default();
//!
//! assert!(decoder.push(&bytes[..3]).unwrap().is_empty());
//! let messages = decoder.push(&bytes[3..]).unwrap();
//! assert_eq!(messages[0].type_id(), 7);
//! ```

use bytes::BytesMut;

use super::message::Message;
use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::Result;

/// Default initial buffer capacity (64KB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed and consumed, waiting for body bytes.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct FrameDecoder {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum accepted body size; larger declared lengths are corrupt.
    max_payload_size: u32,
}

impl FrameDecoder {
    /// Create a decoder with a custom max body size.
    pub fn new(max_payload_size: u32) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY, max_payload_size)
    }

    /// Create a decoder with custom capacity and max body size.
    pub fn with_capacity(capacity: usize, max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// # Errors
    ///
    /// Returns `FrameCorrupt` if a header declares an implausible length.
    /// The decoder must not be used afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Mutable access to the internal buffer so a transport can read
    /// straight into it. Follow up with [`next_message`](Self::next_message).
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to extract a single message from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a corrupt header
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(header) = Header::decode(&self.buffer) else {
                        return Ok(None);
                    };
                    header.validate(self.max_payload_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let remaining = header.payload_length as usize;
                    if self.buffer.len() < remaining {
                        // Reserve once for the whole body instead of growing per read.
                        self.buffer.reserve(remaining - self.buffer.len());
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(Message::new(header.type_id, body)));
                }
            }
        }
    }

    /// Get the number of buffered bytes not yet returned as messages.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a frame has started arriving but is not complete yet.
    pub fn has_partial_frame(&self) -> bool {
        matches!(self.state, State::WaitingForBody { .. }) || !self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcError;
    use crate::protocol::encode;

    fn frame_bytes(type_id: u32, body: &[u8]) -> Vec<u8> {
        encode(&Message::from_slice(type_id, body)).unwrap().to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::default();
        let messages = decoder.push(&frame_bytes(1, b"hello")).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].type_id(), 1);
        assert_eq!(messages[0].body(), b"hello");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut decoder = FrameDecoder::default();
        let mut combined = frame_bytes(1, b"first");
        combined.extend(frame_bytes(2, b"second"));
        combined.extend(frame_bytes(3, b"third"));

        let messages = decoder.push(&combined).unwrap();

        let types: Vec<u32> = messages.iter().map(Message::type_id).collect();
        assert_eq!(types, vec![1, 2, 3]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut decoder = FrameDecoder::default();
        let bytes = frame_bytes(1, b"test");

        assert!(decoder.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForHeader");

        let messages = decoder.push(&bytes[5..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let mut decoder = FrameDecoder::default();
        let body = b"this is a longer body that will be fragmented";
        let bytes = frame_bytes(1, body);

        let split = HEADER_SIZE + 10;
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(decoder.state_name(), "WaitingForBody");

        let messages = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(messages[0].body(), body);
    }

    #[test]
    fn test_empty_body() {
        let mut decoder = FrameDecoder::default();
        let messages = decoder.push(&frame_bytes(4, b"")).unwrap();

        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_empty());
        assert_eq!(decoder.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_large_body() {
        let mut decoder = FrameDecoder::default();
        let body = vec![0xAB; 1024 * 1024];

        let messages = decoder.push(&frame_bytes(1, &body)).unwrap();

        assert_eq!(messages[0].len(), 1024 * 1024);
        assert!(messages[0].body().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_implausible_length_is_corrupt() {
        let mut decoder = FrameDecoder::new(100);
        let header = Header::new(1000, 1).encode();

        let result = decoder.push(&header);
        assert!(matches!(result, Err(IpcError::FrameCorrupt(_))));
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut decoder = FrameDecoder::default();
        let first = frame_bytes(1, b"first");
        let second = frame_bytes(2, b"second");

        let mut data = first.clone();
        data.extend_from_slice(&second[..5]);

        let messages = decoder.push(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(decoder.len(), 5);

        let messages = decoder.push(&second[5..]).unwrap();
        assert_eq!(messages[0].type_id(), 2);
    }

    #[test]
    fn test_byte_at_a_time_matches_bulk() {
        let mut stream = Vec::new();
        for i in 1..=20u32 {
            stream.extend(frame_bytes(i, &i.to_be_bytes().repeat(i as usize)));
        }
        stream.extend(frame_bytes(21, b""));

        let bulk = FrameDecoder::default().push(&stream).unwrap();

        let mut decoder = FrameDecoder::default();
        let mut trickled = Vec::new();
        for byte in &stream {
            trickled.extend(decoder.push(&[*byte]).unwrap());
        }

        assert_eq!(bulk.len(), 21);
        assert_eq!(bulk, trickled);
    }

    #[test]
    fn test_read_into_buffer_mut() {
        let mut decoder = FrameDecoder::default();
        decoder
            .buffer_mut()
            .extend_from_slice(&frame_bytes(3, b"direct"));

        let message = decoder.next_message().unwrap().unwrap();
        assert_eq!(message.body(), b"direct");
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut decoder = FrameDecoder::default();
        let bytes = frame_bytes(1, b"test");
        decoder.push(&bytes[..HEADER_SIZE + 1]).unwrap();
        assert_eq!(decoder.state_name(), "WaitingForBody");

        decoder.clear();

        assert_eq!(decoder.state_name(), "WaitingForHeader");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_partial_frame_tracking() {
        let mut decoder = FrameDecoder::default();
        assert!(!decoder.has_partial_frame());

        // Header only: buffer drained, but a body is still owed.
        decoder.push(&Header::new(4, 1).encode()).unwrap();
        assert!(decoder.is_empty());
        assert!(decoder.has_partial_frame());

        decoder.push(b"body").unwrap();
        assert!(!decoder.has_partial_frame());
    }
}
