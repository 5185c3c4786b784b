//! Reader task: socket → frame decoder → receive queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use super::{io_reason, ErrorReason, Shared};
use crate::error::IpcError;
use crate::protocol::FrameDecoder;
use crate::registry::MessageRegistry;
use crate::transport::TransportReader;

/// Settings the reader needs from the connection config.
#[derive(Debug, Clone, Copy)]
pub(super) struct ReaderSettings {
    pub max_payload_size: u32,
    pub read_buffer_size: usize,
    /// Fail if nothing arrives for this long.
    pub idle_timeout: Option<Duration>,
}

/// Why the read loop ended.
enum ReadEnd {
    /// Peer sent EOF on a frame boundary.
    PeerClosed,
    /// Local close: signal fired, or the receive queue was shut down and
    /// the peer then stopped sending.
    Stopped,
    Failed(ErrorReason),
}

/// Run until the peer closes, the connection is closed locally, or a read
/// fails.
///
/// A local close leaves the signal alone: the writer may still be flushing
/// within the close linger, and `close` triggers the signal once it is done.
pub(super) async fn run<R>(
    mut reader: TransportReader<R>,
    shared: Arc<Shared>,
    registry: Arc<MessageRegistry>,
    settings: ReaderSettings,
) where
    R: AsyncRead + Unpin,
{
    tracing::debug!("Reader task started");

    let mut decoder = FrameDecoder::with_capacity(settings.read_buffer_size, settings.max_payload_size);

    match read_loop(&mut reader, &mut decoder, &shared, &registry, settings.idle_timeout).await {
        ReadEnd::PeerClosed => {
            if shared.state.begin_closing() {
                tracing::debug!("Peer closed the connection");
                shared.teardown();
            }
        }
        ReadEnd::Stopped => {}
        ReadEnd::Failed(reason) => shared.fail(reason),
    }

    tracing::debug!("Reader task exited");
}

async fn read_loop<R>(
    reader: &mut TransportReader<R>,
    decoder: &mut FrameDecoder,
    shared: &Shared,
    registry: &MessageRegistry,
    idle_timeout: Option<Duration>,
) -> ReadEnd
where
    R: AsyncRead + Unpin,
{
    // Set once a local close shut the receive queue. Inbound frames are
    // then read and discarded so the peer never stalls on a full socket.
    let mut draining = false;

    loop {
        let read = match idle_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, reader.read_available(decoder.buffer_mut())).await {
                    Ok(read) => read,
                    Err(_) => return ReadEnd::Failed(ErrorReason::Timeout),
                }
            }
            None => reader.read_available(decoder.buffer_mut()).await,
        };

        match read {
            Ok(n) => shared.counters.record_bytes_received(n),
            Err(IpcError::ConnectionClosed) if reader.signal().is_triggered() => {
                return ReadEnd::Stopped;
            }
            Err(IpcError::ConnectionClosed) if draining => return ReadEnd::Stopped,
            Err(IpcError::ConnectionClosed) if decoder.has_partial_frame() => {
                return ReadEnd::Failed(ErrorReason::Io(format!(
                    "peer closed mid-frame with {} bytes buffered",
                    decoder.len()
                )));
            }
            Err(IpcError::ConnectionClosed) => return ReadEnd::PeerClosed,
            Err(e) => return ReadEnd::Failed(io_reason(e)),
        }

        loop {
            let message = match decoder.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(IpcError::FrameCorrupt(detail)) => {
                    return ReadEnd::Failed(ErrorReason::FrameCorrupt(detail));
                }
                Err(e) => return ReadEnd::Failed(ErrorReason::FrameCorrupt(e.to_string())),
            };

            if draining {
                tracing::trace!("Discarding type {} after close", message.type_id());
                continue;
            }

            if message.is_keep_alive() {
                tracing::trace!("Keep-alive received");
                continue;
            }

            if !registry.accepts(message.type_id()) {
                tracing::warn!(
                    "Dropping message of unregistered type {} ({} bytes)",
                    message.type_id(),
                    message.len()
                );
                shared.counters.record_dropped();
                continue;
            }

            // Blocks while the application is behind: backpressure to the peer.
            if shared.receive_queue.push(message, true).await {
                shared.counters.record_message_received();
            } else if reader.signal().is_triggered() {
                return ReadEnd::Stopped;
            } else {
                tracing::debug!("Receive queue closed, draining inbound frames");
                draining = true;
            }
        }
    }
}
