//! Writer task: send queue → socket.
//!
//! Pops one message (waiting as long as needed), then drains whatever
//! else is already queued, up to [`MAX_BATCH_SIZE`], into a single
//! vectored write.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;

use super::{io_reason, Shared};
use crate::error::{IpcError, Result};
use crate::queue::Pop;
use crate::transport::{OutboundFrame, TransportWriter};

/// Maximum messages written in one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Run until the send queue is shut down and drained, the signal fires,
/// or a write fails.
pub(super) async fn run<W>(
    mut writer: TransportWriter<W>,
    shared: Arc<Shared>,
    keep_alive_interval: Option<Duration>,
) where
    W: AsyncWrite + Unpin,
{
    tracing::debug!("Writer task started");

    match write_loop(&mut writer, &shared, keep_alive_interval).await {
        Ok(()) => {
            // Everything queued is out: tell the peer we are done sending.
            writer.shutdown().await;
        }
        Err(IpcError::ConnectionClosed) => {
            tracing::debug!("Writer interrupted by shutdown");
        }
        Err(e) => shared.fail(io_reason(e)),
    }

    shared.writer_done.send_replace(true);
    tracing::debug!("Writer task exited");
}

async fn write_loop<W>(
    writer: &mut TransportWriter<W>,
    shared: &Shared,
    keep_alive_interval: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match shared.send_queue.pop(true, keep_alive_interval).await {
            Pop::Item(message) => message,
            Pop::Empty => {
                // Idle for a full interval.
                let keep_alive = OutboundFrame::keep_alive();
                writer.write_frames(std::slice::from_ref(&keep_alive)).await?;
                shared.counters.record_keep_alive(keep_alive.size());
                tracing::trace!("Keep-alive sent");
                continue;
            }
            Pop::ShutDown => return Ok(()),
        };

        batch.clear();
        batch.push(OutboundFrame::from_message(&first)?);

        while batch.len() < MAX_BATCH_SIZE {
            match shared.send_queue.try_pop() {
                Pop::Item(message) => batch.push(OutboundFrame::from_message(&message)?),
                Pop::Empty | Pop::ShutDown => break,
            }
        }

        writer.write_frames(&batch).await?;

        let bytes: usize = batch.iter().map(OutboundFrame::size).sum();
        shared.counters.record_sent(batch.len(), bytes);
    }
}
