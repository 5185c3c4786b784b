//! # msgwire
//!
//! Point-to-point message IPC over byte-stream sockets.
//!
//! Two processes exchange typed, length-prefixed messages over TCP or a
//! Unix domain socket. Each [`Connection`] runs a reader task and a
//! writer task that move frames between the socket and two bounded
//! queues, so application code only ever enqueues and dequeues whole
//! [`Message`]s.
//!
//! ## Wire format
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────┐
//! │ length (u32) │ type id (u32)│ body (length bytes) │
//! │  big-endian  │  big-endian  │                     │
//! └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! Type id 0 is reserved for keep-alive frames, which are never delivered.
//!
//! ## Example
//!
//! ```no_run
//! use msgwire::Message;
//!
//! #[tokio::main]
//! async fn main() -> msgwire::Result<()> {
//!     let connection = msgwire::connect_to("127.0.0.1", 7400).await?;
//!
//!     connection.send(Message::from_slice(1, b"start")).await?;
//!     while let Some(reply) = connection.receive(None).await? {
//!         println!("type {} ({} bytes)", reply.type_id(), reply.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod transport;

mod manager;

pub use connection::{
    Connection, ConnectionConfig, ConnectionState, ConnectionStats, ErrorReason, HeartbeatConfig,
    SendMode,
};
pub use error::{IpcError, Result};
pub use manager::{ConnectionManager, Listener};
pub use protocol::Message;
pub use registry::{DecodedValue, Decoder, MessageRegistry};

/// Connect to `host:port` with default settings and an empty registry.
pub async fn connect_to(host: &str, port: u16) -> Result<Connection> {
    ConnectionManager::new().connect_to(host, port).await
}

/// Listen on `127.0.0.1:port` with default settings and an empty registry.
pub async fn listen(port: u16) -> Result<Listener> {
    ConnectionManager::new().listen(port).await
}
