//! Codec module - typed payloads layered over the raw message body.
//!
//! The wire layer only knows bytes. [`MsgPackCodec`] turns serde types
//! into bodies and back; the [`MessageRegistry`](crate::MessageRegistry)
//! ties a Rust type to its wire type id.

mod msgpack;

pub use msgpack::MsgPackCodec;
