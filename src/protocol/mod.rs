//! Protocol module - wire format, framing, and the message value.
//!
//! This module implements the byte-stream framing:
//! - 8-byte header encoding/decoding (`[u32 BE length][u32 BE type_id]`)
//! - Stateless single-frame `encode` / `decode`
//! - Frame decoder for accumulating partial reads

mod frame_decoder;
mod message;
mod wire_format;

pub use frame_decoder::{FrameDecoder, DEFAULT_BUFFER_CAPACITY};
pub use message::{decode, encode, Decode, Message};
pub use wire_format::{
    Header, ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, KEEP_ALIVE_TYPE_ID,
};
