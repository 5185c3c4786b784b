//! Transport module - byte-stream sockets and their capability trait.
//!
//! A [`Transport`] is anything that splits into an independent read half
//! and write half. Concrete variants:
//! - TCP (`tokio::net::TcpStream`)
//! - Unix Domain Sockets (`tokio::net::UnixStream`, unix only)
//! - In-memory duplex streams (`tokio::io::DuplexStream`, for tests and
//!   in-process pairs)
//!
//! [`SocketTransport`] wraps one of these with exact/available reads,
//! full writes and a close that interrupts blocked I/O.

mod signal;
mod socket;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub use signal::ShutdownSignal;
pub use socket::{OutboundFrame, SocketTransport, TransportReader, TransportWriter};

/// Capability set a connection needs from a byte stream.
pub trait Transport: Send + 'static {
    /// Read direction.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Write direction.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Split into halves that can be driven from different tasks.
    fn into_split(self) -> (Self::Reader, Self::Writer);

    /// Human-readable peer address, if the stream has one.
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

impl Transport for TcpStream {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        TcpStream::into_split(self)
    }

    fn peer_addr(&self) -> Option<String> {
        TcpStream::peer_addr(self).ok().map(|a| a.to_string())
    }
}

impl Transport for DuplexStream {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::io::split(self)
    }
}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {
    type Reader = tokio::net::unix::OwnedReadHalf;
    type Writer = tokio::net::unix::OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::net::UnixStream::into_split(self)
    }

    fn peer_addr(&self) -> Option<String> {
        let addr = tokio::net::UnixStream::peer_addr(self).ok()?;
        addr.as_pathname().map(|p| p.display().to_string())
    }
}
