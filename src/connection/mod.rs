//! Connection module - one established, bidirectional message stream.
//!
//! # Architecture
//!
//! ```text
//!             send()                                   receive()
//!               │                                          ▲
//!               ▼                                          │
//!         send queue ──► writer task ──► socket ──► reader task ──► receive queue
//!                              ▲                         ▲
//!                              └──── ShutdownSignal ─────┘
//!                                 supervisor joins both
//! ```
//!
//! The application never touches the socket. Sends complete as soon as
//! the message is queued; a full queue pushes back on the sender (or
//! fails with `QueueFull` in non-blocking mode). The reader blocks on a
//! full receive queue, which stops reads and in turn pushes back on the
//! peer through the socket buffers.
//!
//! Failures inside the tasks never surface as panics or task results.
//! They move the connection into [`ConnectionState::Error`], shut both
//! queues down, and are reported by the next `send` or `receive`.
//!
//! # Example
//!
//! ```
//! use msgwire::{Connection, ConnectionConfig, Message};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> msgwire::Result<()> {
//! let (left, right) = Connection::pair(ConnectionConfig::default());
//!
//! left.send(Message::from_slice(1, b"ping")).await?;
//! let message = right.receive(None).await?.expect("no timeout given");
//! assert_eq!(message.body(), b"ping");
//!
//! left.close().await;
//! assert!(right.receive(None).await.is_err());
//! # Ok(())
//! # }
//! ```

mod config;
mod reader;
mod state;
mod writer;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{IpcError, Result};
use crate::protocol::Message;
use crate::queue::{BoundedQueue, Pop};
use crate::registry::MessageRegistry;
use crate::transport::{ShutdownSignal, SocketTransport, Transport};

pub use config::{ConnectionConfig, HeartbeatConfig, SendMode, DEFAULT_CLOSE_LINGER};
pub use state::{ConnectionState, ConnectionStats, ErrorReason};

use reader::ReaderSettings;
use state::{Counters, StateCell};

/// Buffer size of the in-memory pipe behind [`Connection::pair`].
const PAIR_PIPE_SIZE: usize = 64 * 1024;

/// State shared between the handle and its tasks.
pub(crate) struct Shared {
    state: StateCell,
    send_queue: BoundedQueue<Message>,
    receive_queue: BoundedQueue<Message>,
    signal: ShutdownSignal,
    /// Set once the writer task has exited.
    writer_done: watch::Sender<bool>,
    /// Set once both tasks have exited and the final state is in place.
    finished: watch::Sender<bool>,
    counters: Counters,
}

impl Shared {
    fn new(config: &ConnectionConfig, signal: ShutdownSignal) -> Self {
        Self {
            state: StateCell::new(),
            send_queue: BoundedQueue::new(config.send_capacity),
            receive_queue: BoundedQueue::new(config.receive_capacity),
            signal,
            writer_done: watch::channel(false).0,
            finished: watch::channel(false).0,
            counters: Counters::default(),
        }
    }

    /// Enter the error state (if not terminal yet) and tear down.
    fn fail(&self, reason: ErrorReason) {
        if self.state.fail(reason.clone()) {
            tracing::error!("Connection failed: {}", reason);
        }
        self.teardown();
    }

    /// Wake everything blocked on this connection. Idempotent.
    fn teardown(&self) {
        self.send_queue.shutdown();
        self.receive_queue.shutdown();
        self.signal.trigger();
    }

    /// The error `send`/`receive` report once the queues are shut down.
    fn closed_error(&self) -> IpcError {
        match self.state.get() {
            ConnectionState::Error(reason) => IpcError::ConnectionFailed(reason),
            _ => IpcError::ConnectionClosed,
        }
    }
}

/// Map a task-side error to the reason recorded in the state.
fn io_reason(error: IpcError) -> ErrorReason {
    match error {
        IpcError::Io(e) => ErrorReason::Io(e.to_string()),
        other => ErrorReason::Io(other.to_string()),
    }
}

/// Wait for both tasks, then publish the final state.
async fn supervise(shared: Arc<Shared>, reader: JoinHandle<()>, writer: JoinHandle<()>) {
    let (reader, writer) = tokio::join!(reader, writer);

    for (task, result) in [("reader", reader), ("writer", writer)] {
        if let Err(e) = result {
            shared.fail(ErrorReason::Io(format!("{} task aborted: {}", task, e)));
        }
    }

    shared.teardown();
    shared.state.finish();
    shared.finished.send_replace(true);
}

/// An established connection.
///
/// Cheap to share behind an `Arc`: every method takes `&self`, so one
/// task can send while another receives. Dropping the last handle tears
/// the connection down without flushing; call [`close`](Self::close)
/// for an orderly shutdown.
pub struct Connection {
    shared: Arc<Shared>,
    config: ConnectionConfig,
    registry: Arc<MessageRegistry>,
    peer_addr: Option<String>,
}

impl Connection {
    /// Start the reader, writer and supervisor tasks on an established
    /// transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(
        transport: SocketTransport<T>,
        config: ConnectionConfig,
        registry: Arc<MessageRegistry>,
    ) -> Self {
        let config = config.normalized();
        let peer_addr = transport.peer_addr().map(str::to_string);
        let (read_half, write_half, signal) = transport.into_parts();
        let shared = Arc::new(Shared::new(&config, signal));

        let settings = ReaderSettings {
            max_payload_size: config.max_payload_size,
            read_buffer_size: config.read_buffer_size,
            idle_timeout: config.heartbeat.map(|h| h.timeout),
        };
        let reader_task = tokio::spawn(reader::run(
            read_half,
            shared.clone(),
            registry.clone(),
            settings,
        ));
        let writer_task = tokio::spawn(writer::run(
            write_half,
            shared.clone(),
            config.heartbeat.map(|h| h.interval),
        ));
        tokio::spawn(supervise(shared.clone(), reader_task, writer_task));

        if shared.state.mark_connected() {
            tracing::debug!(
                "Connected to {}",
                peer_addr.as_deref().unwrap_or("in-process peer")
            );
        }

        Self {
            shared,
            config,
            registry,
            peer_addr,
        }
    }

    /// Wrap an already established stream.
    pub fn from_stream<T: Transport>(
        stream: T,
        config: ConnectionConfig,
        registry: Arc<MessageRegistry>,
    ) -> Self {
        Self::start(SocketTransport::new(stream), config, registry)
    }

    /// Two connected endpoints over an in-memory pipe, with an empty
    /// registry. Handy for tests and in-process producer/consumer setups.
    pub fn pair(config: ConnectionConfig) -> (Self, Self) {
        let registry = Arc::new(MessageRegistry::new());
        let (left, right) = tokio::io::duplex(PAIR_PIPE_SIZE);
        (
            Self::from_stream(left, config.clone(), registry.clone()),
            Self::from_stream(right, config, registry),
        )
    }

    /// Queue a message for sending.
    ///
    /// Completion means the message is queued, not that the peer has it.
    /// Waits for queue space in [`SendMode::Blocking`]; fails with
    /// `QueueFull` in [`SendMode::NonBlocking`].
    ///
    /// # Errors
    ///
    /// - `ReservedType` for the keep-alive type id
    /// - `PayloadTooLarge` if the body exceeds `max_payload_size`
    /// - `ConnectionClosed` / `ConnectionFailed` once the connection is down
    pub async fn send(&self, message: Message) -> Result<()> {
        self.check_outbound(&message)?;

        let blocking = self.config.send_mode == SendMode::Blocking;
        if self.shared.send_queue.push(message, blocking).await {
            return Ok(());
        }
        Err(self.rejected_send())
    }

    /// Queue a message without ever waiting.
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.check_outbound(&message)?;

        if self.shared.send_queue.try_push(message) {
            return Ok(());
        }
        Err(self.rejected_send())
    }

    /// Encode a registered Rust value and send it.
    pub async fn send_value<T: Serialize + 'static>(&self, value: &T) -> Result<()> {
        let message = self.registry.encode(value)?;
        self.send(message).await
    }

    fn check_outbound(&self, message: &Message) -> Result<()> {
        if message.is_keep_alive() {
            return Err(IpcError::ReservedType(message.type_id()));
        }
        if message.len() > self.config.max_payload_size as usize {
            return Err(IpcError::PayloadTooLarge {
                size: message.len(),
                max: self.config.max_payload_size as usize,
            });
        }
        match self.shared.state.get() {
            ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
            ConnectionState::Error(reason) => Err(IpcError::ConnectionFailed(reason)),
            ConnectionState::Closing | ConnectionState::Closed => Err(IpcError::ConnectionClosed),
        }
    }

    fn rejected_send(&self) -> IpcError {
        if self.shared.send_queue.is_shut_down() {
            self.shared.closed_error()
        } else {
            IpcError::QueueFull
        }
    }

    /// Take the next inbound message.
    ///
    /// Waits up to `timeout` (forever with `None`). Returns `Ok(None)` if
    /// the timeout expired. Messages that arrived before the connection
    /// went down are still delivered; after that it fails with
    /// `ConnectionClosed`, or `ConnectionFailed` if the connection broke.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        match self.shared.receive_queue.pop(true, timeout).await {
            Pop::Item(message) => Ok(Some(message)),
            Pop::Empty => Ok(None),
            Pop::ShutDown => Err(self.shared.closed_error()),
        }
    }

    /// Take the next inbound message if one is already queued.
    pub fn try_receive(&self) -> Result<Option<Message>> {
        match self.shared.receive_queue.try_pop() {
            Pop::Item(message) => Ok(Some(message)),
            Pop::Empty => Ok(None),
            Pop::ShutDown => Err(self.shared.closed_error()),
        }
    }

    /// Receive the next message and decode it as a registered Rust type.
    ///
    /// Fails with `TypeMismatch` if the next message is of another type;
    /// that message is consumed.
    pub async fn receive_value<T>(&self, timeout: Option<Duration>) -> Result<Option<T>>
    where
        T: DeserializeOwned + 'static,
    {
        match self.receive(timeout).await? {
            Some(message) => self.registry.decode_as(&message).map(Some),
            None => Ok(None),
        }
    }

    /// Close the connection.
    ///
    /// Stops accepting sends, gives the writer up to `close_linger` to
    /// flush what is already queued, then interrupts both tasks and waits
    /// for them. Messages still queued after the linger are discarded.
    /// Idempotent and safe to call from several tasks at once.
    pub async fn close(&self) {
        if self.shared.state.begin_closing() {
            tracing::debug!("Closing connection");
        }
        self.shared.send_queue.shutdown();
        self.shared.receive_queue.shutdown();

        let mut writer_done = self.shared.writer_done.subscribe();
        let flushed = tokio::time::timeout(
            self.config.close_linger,
            writer_done.wait_for(|done| *done),
        )
        .await
        .is_ok();
        if !flushed {
            let dropped = self.shared.send_queue.clear();
            tracing::debug!("Close linger expired, {} queued messages dropped", dropped);
        }

        self.shared.signal.trigger();
        self.wait_closed().await;
    }

    /// Wait until both tasks have exited and return the final state
    /// (`Closed` or `Error`).
    pub async fn wait_closed(&self) -> ConnectionState {
        let mut finished = self.shared.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
        self.shared.state.get()
    }

    /// Wait until the state satisfies `predicate`, returning that state.
    ///
    /// Returns the last state if it becomes terminal without matching.
    pub async fn wait_for_state<F>(&self, mut predicate: F) -> ConnectionState
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut changes = self.shared.state.subscribe();
        let _ = changes
            .wait_for(|state| predicate(state) || state.is_terminal())
            .await;
        let state = changes.borrow().clone();
        state
    }

    /// Subscribe to state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.get() == ConnectionState::Connected
    }

    /// Remote address, when the transport has one.
    pub fn peer_addr(&self) -> Option<&str> {
        self.peer_addr.as_deref()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.counters.snapshot()
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.shared.state.begin_closing() {
            tracing::debug!("Connection dropped without close");
        }
        self.shared.teardown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, Header};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const WAIT: Duration = Duration::from_secs(2);

    fn registry() -> Arc<MessageRegistry> {
        Arc::new(MessageRegistry::new())
    }

    /// A connection whose peer is a raw byte pipe under test control.
    fn with_raw_peer(config: ConnectionConfig) -> (Connection, DuplexStream) {
        let (local, remote) = duplex(PAIR_PIPE_SIZE);
        (Connection::from_stream(local, config, registry()), remote)
    }

    async fn next(conn: &Connection) -> Message {
        conn.receive(Some(WAIT)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_starts_connected() {
        let (left, right) = Connection::pair(ConnectionConfig::default());

        assert!(left.is_connected());
        assert_eq!(right.state(), ConnectionState::Connected);
        assert!(left.peer_addr().is_none());
    }

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let (left, right) = Connection::pair(ConnectionConfig::default());

        for i in 0..100u32 {
            left.send(Message::new(1, i.to_be_bytes().to_vec())).await.unwrap();
            if i % 10 == 9 {
                for j in i - 9..=i {
                    assert_eq!(next(&right).await.body(), j.to_be_bytes());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_both_directions() {
        let (left, right) = Connection::pair(ConnectionConfig::default());

        left.send(Message::from_slice(1, b"ping")).await.unwrap();
        assert_eq!(next(&right).await.body(), b"ping");

        right.send(Message::from_slice(2, b"pong")).await.unwrap();
        let reply = next(&left).await;
        assert_eq!(reply.type_id(), 2);
        assert_eq!(reply.body(), b"pong");
    }

    #[tokio::test]
    async fn test_receive_timeout_returns_none() {
        let (left, _right) = Connection::pair(ConnectionConfig::default());

        let result = left.receive(Some(Duration::from_millis(20))).await.unwrap();
        assert!(result.is_none());
        assert!(left.try_receive().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserved_type_rejected() {
        let (left, _right) = Connection::pair(ConnectionConfig::default());

        let result = left.send(Message::from_slice(0, b"")).await;
        assert!(matches!(result, Err(IpcError::ReservedType(0))));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_locally() {
        let config = ConnectionConfig {
            max_payload_size: 16,
            ..ConnectionConfig::default()
        };
        let (left, right) = Connection::pair(config);

        let result = left.send(Message::new(1, vec![0u8; 17])).await;
        assert!(matches!(
            result,
            Err(IpcError::PayloadTooLarge { size: 17, max: 16 })
        ));

        left.send(Message::new(1, vec![0u8; 16])).await.unwrap();
        assert_eq!(next(&right).await.len(), 16);
    }

    const HEADER_AND_BODY: usize = 12;

    #[tokio::test]
    async fn test_non_blocking_send_reports_queue_full() {
        let config = ConnectionConfig {
            send_capacity: 1,
            send_mode: SendMode::NonBlocking,
            ..ConnectionConfig::default()
        };
        // Nobody reads the raw peer, and the pipe holds only one frame.
        let (local, _remote) = duplex(HEADER_AND_BODY);
        let conn = Connection::from_stream(local, config, registry());

        let mut full = false;
        for _ in 0..10 {
            match conn.send(Message::from_slice(1, b"abcd")).await {
                Ok(()) => {}
                Err(IpcError::QueueFull) => {
                    full = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(full);
        assert!(matches!(
            conn.try_send(Message::from_slice(1, b"abcd")),
            Err(IpcError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receive() {
        let (left, _right) = Connection::pair(ConnectionConfig::default());
        let left = Arc::new(left);

        let receiver = {
            let left = left.clone();
            tokio::spawn(async move { left.receive(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        left.close().await;

        let result = tokio::time::timeout(WAIT, receiver).await.unwrap().unwrap();
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
        assert_eq!(left.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_fast() {
        let (left, _right) = Connection::pair(ConnectionConfig::default());
        left.close().await;
        left.close().await;

        assert!(matches!(
            left.send(Message::from_slice(1, b"x")).await,
            Err(IpcError::ConnectionClosed)
        ));
        assert!(matches!(
            left.receive(None).await,
            Err(IpcError::ConnectionClosed)
        ));
        assert!(matches!(left.try_receive(), Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_flushes_queued_messages() {
        let (left, right) = Connection::pair(ConnectionConfig::default());

        for i in 0..5u8 {
            left.send(Message::new(1, vec![i])).await.unwrap();
        }
        left.close().await;

        for i in 0..5u8 {
            assert_eq!(next(&right).await.body(), [i]);
        }
        assert!(matches!(
            right.receive(Some(WAIT)).await,
            Err(IpcError::ConnectionClosed)
        ));
        assert_eq!(right.wait_closed().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_flushes_while_peer_keeps_sending() {
        let config = ConnectionConfig {
            receive_capacity: 1,
            ..ConnectionConfig::default()
        };
        let (local, mut raw) = duplex(16);
        let conn = Connection::from_stream(local, config, registry());

        // Never received: the first fills the queue, the reader blocks on the second.
        let mut inbound = encode(&Message::from_slice(1, b"")).unwrap().to_vec();
        inbound.extend_from_slice(&encode(&Message::from_slice(1, b"")).unwrap());
        raw.write_all(&inbound).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..3u8 {
            conn.send(Message::new(2, vec![i])).await.unwrap();
        }

        let peer = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut bytes = Vec::new();
            raw.read_to_end(&mut bytes).await.unwrap();
            bytes
        };
        let ((), bytes) = tokio::time::timeout(WAIT, async { tokio::join!(conn.close(), peer) })
            .await
            .unwrap();

        let bodies: Vec<u8> = crate::protocol::FrameDecoder::default()
            .push(&bytes)
            .unwrap()
            .iter()
            .map(|m| m.body()[0])
            .collect();
        assert_eq!(bodies, vec![0, 1, 2]);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_concurrent_close() {
        let (left, _right) = Connection::pair(ConnectionConfig::default());
        let left = Arc::new(left);

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let left = left.clone();
                tokio::spawn(async move { left.close().await })
            })
            .collect();
        for closer in closers {
            tokio::time::timeout(WAIT, closer).await.unwrap().unwrap();
        }
        assert_eq!(left.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_drop_detected() {
        let (left, right) = Connection::pair(ConnectionConfig::default());
        drop(right);

        let result = tokio::time::timeout(WAIT, left.receive(None)).await.unwrap();
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
        assert_eq!(left.wait_closed().await, ConnectionState::Closed);
        assert!(matches!(
            left.send(Message::from_slice(1, b"late")).await,
            Err(IpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_corrupt_frame_fails_connection() {
        let config = ConnectionConfig {
            max_payload_size: 1024,
            ..ConnectionConfig::default()
        };
        let (conn, mut raw) = with_raw_peer(config);

        raw.write_all(&Header::new(4096, 1).encode()).await.unwrap();

        let result = tokio::time::timeout(WAIT, conn.receive(None)).await.unwrap();
        match result {
            Err(IpcError::ConnectionFailed(ErrorReason::FrameCorrupt(_))) => {}
            other => panic!("expected FrameCorrupt failure, got {other:?}"),
        }
        assert!(matches!(
            conn.wait_closed().await,
            ConnectionState::Error(ErrorReason::FrameCorrupt(_))
        ));
        assert!(matches!(
            conn.send(Message::from_slice(1, b"x")).await,
            Err(IpcError::ConnectionFailed(ErrorReason::FrameCorrupt(_)))
        ));
    }

    #[tokio::test]
    async fn test_messages_before_corruption_are_delivered() {
        let (conn, mut raw) = with_raw_peer(ConnectionConfig::default());

        let mut bytes = encode(&Message::from_slice(3, b"good")).unwrap().to_vec();
        // Keep-alive with a body is malformed.
        bytes.extend_from_slice(&Header::new(2, 0).encode());
        bytes.extend_from_slice(b"xx");
        raw.write_all(&bytes).await.unwrap();

        assert_eq!(next(&conn).await.body(), b"good");
        assert!(matches!(
            conn.receive(Some(WAIT)).await,
            Err(IpcError::ConnectionFailed(ErrorReason::FrameCorrupt(_)))
        ));
    }

    #[tokio::test]
    async fn test_partial_writes_reassembled() {
        let (conn, mut raw) = with_raw_peer(ConnectionConfig::default());

        let mut bytes = Vec::new();
        for i in 1..=3u32 {
            bytes.extend_from_slice(&encode(&Message::new(i, vec![i as u8; 40])).unwrap());
        }
        let writer = tokio::spawn(async move {
            for byte in bytes {
                raw.write_all(&[byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
            raw
        });

        for i in 1..=3u32 {
            let message = next(&conn).await;
            assert_eq!(message.type_id(), i);
            assert_eq!(message.body(), vec![i as u8; 40]);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_frame_at_eof_is_error() {
        let (conn, mut raw) = with_raw_peer(ConnectionConfig::default());

        let bytes = encode(&Message::from_slice(1, b"truncated")).unwrap();
        raw.write_all(&bytes[..bytes.len() - 3]).await.unwrap();
        drop(raw);

        assert!(matches!(
            conn.wait_closed().await,
            ConnectionState::Error(ErrorReason::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_keep_alives_are_not_delivered() {
        let (conn, mut raw) = with_raw_peer(ConnectionConfig::default());

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&Header::new(0, 0).encode());
        bytes.extend_from_slice(&encode(&Message::from_slice(7, b"data")).unwrap());
        bytes.extend_from_slice(&Header::new(0, 0).encode());
        raw.write_all(&bytes).await.unwrap();

        assert_eq!(next(&conn).await.type_id(), 7);
        assert!(conn
            .receive(Some(Duration::from_millis(30)))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_on_silent_peer() {
        let config = ConnectionConfig {
            heartbeat: Some(HeartbeatConfig::new(
                Duration::from_millis(20),
                Duration::from_millis(100),
            )),
            ..ConnectionConfig::default()
        };
        // The raw peer keeps its end open but never writes.
        let (conn, _raw) = with_raw_peer(config);

        let result = tokio::time::timeout(WAIT, conn.receive(None)).await.unwrap();
        assert!(matches!(
            result,
            Err(IpcError::ConnectionFailed(ErrorReason::Timeout))
        ));
        assert_eq!(
            conn.state(),
            ConnectionState::Error(ErrorReason::Timeout)
        );
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_idle_pair_alive() {
        let config = ConnectionConfig {
            heartbeat: Some(HeartbeatConfig::new(
                Duration::from_millis(10),
                Duration::from_millis(80),
            )),
            ..ConnectionConfig::default()
        };
        let (left, right) = Connection::pair(config);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(left.is_connected());
        assert!(right.is_connected());
        assert!(left.stats().keep_alives_sent > 0);
        assert_eq!(right.stats().messages_received, 0);
    }

    #[tokio::test]
    async fn test_writer_emits_keep_alive_frames() {
        let config = ConnectionConfig {
            heartbeat: Some(HeartbeatConfig::new(
                Duration::from_millis(10),
                Duration::from_secs(5),
            )),
            ..ConnectionConfig::default()
        };
        let (_conn, mut raw) = with_raw_peer(config);

        let mut header = [0u8; 8];
        tokio::time::timeout(WAIT, raw.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header, [0u8; 8]);
    }

    #[tokio::test]
    async fn test_unregistered_types_dropped() {
        let mut registry = MessageRegistry::new();
        registry.register::<String>(1, "Text").unwrap();
        let (local, mut raw) = duplex(PAIR_PIPE_SIZE);
        let conn = Connection::from_stream(local, ConnectionConfig::default(), Arc::new(registry));

        let mut bytes = encode(&Message::from_slice(9, b"unknown")).unwrap().to_vec();
        bytes.extend_from_slice(
            &encode(&crate::codec::MsgPackCodec::encode_message(1, &"known").unwrap()).unwrap(),
        );
        raw.write_all(&bytes).await.unwrap();

        let text: String = conn.receive_value(Some(WAIT)).await.unwrap().unwrap();
        assert_eq!(text, "known");
        assert_eq!(conn.stats().messages_dropped, 1);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_send_value_round_trip() {
        let mut registry = MessageRegistry::new();
        registry.register::<Vec<u16>>(4, "Layers").unwrap();
        let registry = Arc::new(registry);
        let (a, b) = duplex(PAIR_PIPE_SIZE);
        let left = Connection::from_stream(a, ConnectionConfig::default(), registry.clone());
        let right = Connection::from_stream(b, ConnectionConfig::default(), registry);

        left.send_value(&vec![1u16, 2, 3]).await.unwrap();

        let layers: Vec<u16> = right.receive_value(Some(WAIT)).await.unwrap().unwrap();
        assert_eq!(layers, vec![1, 2, 3]);
        assert!(matches!(
            left.send_value(&7u8).await,
            Err(IpcError::UnregisteredType(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_count_traffic() {
        let (left, right) = Connection::pair(ConnectionConfig::default());

        left.send(Message::from_slice(1, b"12345")).await.unwrap();
        left.send(Message::from_slice(1, b"")).await.unwrap();
        next(&right).await;
        next(&right).await;
        // Counters are final once the writer has exited.
        left.close().await;

        let sent = left.stats();
        assert_eq!(sent.messages_sent, 2);
        assert_eq!(sent.bytes_sent, 8 + 5 + 8);

        let received = right.stats();
        assert_eq!(received.messages_received, 2);
        assert_eq!(received.bytes_received, 21);
    }

    #[tokio::test]
    async fn test_drop_tears_down_peer() {
        let (left, right) = Connection::pair(ConnectionConfig::default());
        let mut changes = right.state_changes();
        drop(left);

        let state = tokio::time::timeout(WAIT, right.wait_for_state(|s| s.is_terminal()))
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Closed);
        assert!(changes.has_changed().unwrap());
    }
}
