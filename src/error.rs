//! Error types for msgwire.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ErrorReason;

/// Main error type for all msgwire operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Outbound connect did not complete in time.
    #[error("Connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The peer actively refused the connection.
    #[error("Connection refused by {addr}")]
    ConnectRefused { addr: String },

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame header; the byte stream cannot be resynchronized.
    #[error("Corrupt frame: {0}")]
    FrameCorrupt(String),

    /// Message body does not fit the wire length field or the configured limit.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Non-blocking send on a full send queue.
    #[error("Send queue full")]
    QueueFull,

    /// No traffic from the peer within the heartbeat timeout.
    #[error("Heartbeat timeout")]
    Timeout,

    /// Connection closed (locally or by the peer).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection is in the terminal error state.
    #[error("Connection failed: {0}")]
    ConnectionFailed(ErrorReason),

    /// Type id reserved by the protocol (keep-alive).
    #[error("Message type {0} is reserved")]
    ReservedType(u32),

    /// No decoder registered for this type id.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    /// Message type id does not match the requested Rust type.
    #[error("Message type {actual} does not match expected type {expected}")]
    TypeMismatch { expected: u32, actual: u32 },

    /// Rust type was never registered.
    #[error("Type {0} is not registered")]
    UnregisteredType(&'static str),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON error (configuration only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;
