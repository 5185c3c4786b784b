//! Socket transport: reads and writes raw bytes on one duplex stream.
//!
//! # Architecture
//!
//! ```text
//!                        ┌─► TransportReader ─► reader task
//! Transport ─ split ─────┤
//!                        └─► TransportWriter ◄─ writer task
//!              (both halves share one ShutdownSignal)
//! ```
//!
//! The halves touch disjoint directions of the stream; the only shared
//! state is the shutdown signal.

use std::io::IoSlice;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{tcp, ShutdownSignal, Transport};
use crate::error::{IpcError, Result};
use crate::protocol::{Header, Message, HEADER_SIZE, KEEP_ALIVE_TYPE_ID};

/// Minimum spare capacity before a read; smaller gaps are grown first.
const MIN_READ_SPACE: usize = 4 * 1024;

/// A frame ready to be written to the socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header (8 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Body bytes (can be empty).
    pub body: Bytes,
}

impl OutboundFrame {
    /// Build an outbound frame from a message.
    ///
    /// Fails with `PayloadTooLarge` if the body does not fit a u32 length.
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            header: message.header()?.encode(),
            body: message.body_bytes(),
        })
    }

    /// The keep-alive frame: reserved type, empty body.
    pub fn keep_alive() -> Self {
        Self {
            header: Header::new(0, KEEP_ALIVE_TYPE_ID).encode(),
            body: Bytes::new(),
        }
    }

    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Read half of a transport.
pub struct TransportReader<R> {
    inner: R,
    signal: ShutdownSignal,
}

impl<R: AsyncRead + Unpin> TransportReader<R> {
    pub fn new(inner: R, signal: ShutdownSignal) -> Self {
        Self { inner, signal }
    }

    /// Read whatever is currently available, appending to `buf`.
    ///
    /// Returns the number of bytes read (never 0). Peer EOF and a fired
    /// shutdown signal both yield `ConnectionClosed`.
    pub async fn read_available(&mut self, buf: &mut BytesMut) -> Result<usize> {
        if buf.capacity() - buf.len() < MIN_READ_SPACE {
            buf.reserve(MIN_READ_SPACE);
        }

        tokio::select! {
            biased;
            _ = self.signal.triggered() => Err(IpcError::ConnectionClosed),
            read = self.inner.read_buf(buf) => match read {
                Ok(0) => Err(IpcError::ConnectionClosed),
                Ok(n) => Ok(n),
                Err(e) => Err(IpcError::Io(e)),
            },
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// EOF before `n` bytes arrive yields `ConnectionClosed`.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(n);

        tokio::select! {
            biased;
            _ = self.signal.triggered() => Err(IpcError::ConnectionClosed),
            read = self.inner.read_exact(&mut buf) => match read {
                Ok(_) => Ok(buf.freeze()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(IpcError::ConnectionClosed)
                }
                Err(e) => Err(IpcError::Io(e)),
            },
        }
    }

    #[inline]
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

/// Write half of a transport.
pub struct TransportWriter<W> {
    inner: W,
    signal: ShutdownSignal,
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    pub fn new(inner: W, signal: ShutdownSignal) -> Self {
        Self { inner, signal }
    }

    /// Write all of `bytes` and flush.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let signal = self.signal.clone();
        let inner = &mut self.inner;

        tokio::select! {
            biased;
            _ = signal.triggered() => Err(IpcError::ConnectionClosed),
            written = async {
                inner.write_all(bytes).await?;
                inner.flush().await
            } => written.map_err(IpcError::Io),
        }
    }

    /// Write a batch of frames with scatter/gather I/O and flush.
    pub async fn write_frames(&mut self, batch: &[OutboundFrame]) -> Result<()> {
        let signal = self.signal.clone();

        tokio::select! {
            biased;
            _ = signal.triggered() => Err(IpcError::ConnectionClosed),
            written = write_batch(&mut self.inner, batch) => written,
        }
    }

    /// Half-close: flush and send FIN. Errors are ignored, the peer may be gone.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!("Write half shutdown failed: {}", e);
        }
    }

    #[inline]
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// Resumes after partial writes until every byte is out.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.body.is_empty() {
            let body_end = offset + frame.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.body[start..]));
            }
            offset = body_end;
        }
    }

    slices
}

/// One established socket: read half, write half, shared close signal.
pub struct SocketTransport<T: Transport> {
    reader: TransportReader<T::Reader>,
    writer: TransportWriter<T::Writer>,
    signal: ShutdownSignal,
    peer_addr: Option<String>,
}

impl<T: Transport> SocketTransport<T> {
    /// Wrap an established stream.
    pub fn new(stream: T) -> Self {
        let peer_addr = stream.peer_addr();
        let (read_half, write_half) = stream.into_split();
        let signal = ShutdownSignal::new();

        Self {
            reader: TransportReader::new(read_half, signal.clone()),
            writer: TransportWriter::new(write_half, signal.clone()),
            signal,
            peer_addr,
        }
    }

    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        self.reader.read_exact(n).await
    }

    pub async fn read_available(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.reader.read_available(buf).await
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write(bytes).await
    }

    pub async fn write_frames(&mut self, batch: &[OutboundFrame]) -> Result<()> {
        self.writer.write_frames(batch).await
    }

    /// Close both directions. Idempotent; interrupts blocked reads/writes
    /// in other tasks through the shared signal. The socket itself is
    /// released when both halves are dropped.
    pub fn close(&self) {
        self.signal.trigger();
    }

    /// A handle that can close this transport from anywhere.
    pub fn close_handle(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_triggered()
    }

    pub fn peer_addr(&self) -> Option<&str> {
        self.peer_addr.as_deref()
    }

    /// Split into halves for the reader and writer tasks.
    pub fn into_parts(
        self,
    ) -> (
        TransportReader<T::Reader>,
        TransportWriter<T::Writer>,
        ShutdownSignal,
    ) {
        (self.reader, self.writer, self.signal)
    }
}

impl SocketTransport<TcpStream> {
    /// Establish an outbound TCP connection.
    pub async fn connect(host: &str, port: u16, timeout: std::time::Duration) -> Result<Self> {
        let stream = tcp::connect(host, port, timeout).await?;
        Ok(Self::new(stream))
    }

    /// Accept one inbound TCP connection.
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _addr) = tcp::accept(listener).await?;
        Ok(Self::new(stream))
    }
}
