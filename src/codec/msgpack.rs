//! MsgPack payload codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map), so a
//! peer can add or reorder fields without breaking older readers and
//! non-Rust peers see field names rather than positions.
//!
//! # Example
//!
//! ```
//! use msgwire::codec::MsgPackCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct JobStatus {
//!     job_id: u32,
//!     progress: f32,
//! }
//!
//! let status = JobStatus { job_id: 7, progress: 0.5 };
//! let message = MsgPackCodec::encode_message(3, &status).unwrap();
//! assert_eq!(message.type_id(), 3);
//!
//! let decoded: JobStatus = MsgPackCodec::decode(message.body()).unwrap();
//! assert_eq!(decoded, status);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::protocol::Message;

/// MessagePack codec for structured bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a value straight into a [`Message`] of the given type.
    pub fn encode_message<T: Serialize>(type_id: u32, value: &T) -> Result<Message> {
        Ok(Message::new(type_id, Self::encode(value)?))
    }
}
