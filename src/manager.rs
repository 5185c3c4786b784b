//! Connection manager and listener.
//!
//! The [`ConnectionManager`] holds the settings and message registry
//! shared by every connection it creates. Configure it with the fluent
//! setters, then connect out or listen:
//!
//! ```no_run
//! use std::time::Duration;
//! use msgwire::{ConnectionManager, MessageRegistry};
//!
//! # async fn run() -> msgwire::Result<()> {
//! let mut registry = MessageRegistry::new();
//! registry.register::<String>(1, "Text")?;
//!
//! let manager = ConnectionManager::with_registry(registry)
//!     .send_capacity(64)
//!     .heartbeat(Duration::from_secs(1), Duration::from_secs(5));
//!
//! let listener = manager.listen(7400).await?;
//! let connection = listener.accept().await?;
//! let text: Option<String> = connection.receive_value(None).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};

use crate::connection::{Connection, ConnectionConfig, HeartbeatConfig, SendMode};
use crate::error::{IpcError, Result};
use crate::registry::MessageRegistry;
use crate::transport::{tcp, ShutdownSignal, SocketTransport};

#[cfg(unix)]
use crate::transport::unix::{self, UnixSocketListener};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Factory for connections sharing one configuration and registry.
#[derive(Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    registry: Arc<MessageRegistry>,
}

impl ConnectionManager {
    /// Default configuration, empty registry.
    pub fn new() -> Self {
        Self::with_registry(MessageRegistry::new())
    }

    pub fn with_registry(registry: MessageRegistry) -> Self {
        Self::with_shared_registry(Arc::new(registry))
    }

    /// Use a registry that is also shared elsewhere.
    pub fn with_shared_registry(registry: Arc<MessageRegistry>) -> Self {
        Self {
            config: ConnectionConfig::default(),
            registry,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config.normalized();
        self
    }

    /// Set the send queue capacity.
    ///
    /// Default: 10
    pub fn send_capacity(mut self, capacity: usize) -> Self {
        self.config.send_capacity = capacity.max(1);
        self
    }

    /// Set the receive queue capacity.
    ///
    /// Default: 10
    pub fn receive_capacity(mut self, capacity: usize) -> Self {
        self.config.receive_capacity = capacity.max(1);
        self
    }

    /// Choose whether `send` waits or fails on a full queue.
    ///
    /// Default: `SendMode::Blocking`
    pub fn send_mode(mut self, mode: SendMode) -> Self {
        self.config.send_mode = mode;
        self
    }

    /// Set the largest body accepted in either direction.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how long `close()` waits for queued messages to be written.
    ///
    /// Default: 500 milliseconds
    pub fn close_linger(mut self, linger: Duration) -> Self {
        self.config.close_linger = linger;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Enable keep-alives every `interval` and fail connections that stay
    /// silent for `timeout`.
    ///
    /// Default: disabled
    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.heartbeat = Some(HeartbeatConfig::new(interval, timeout));
        self
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Connect to `host:port`.
    ///
    /// # Errors
    ///
    /// `ConnectRefused` or `ConnectTimeout`; never retried.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<Connection> {
        let transport = SocketTransport::connect(host, port, self.config.connect_timeout).await?;
        Ok(self.start(transport))
    }

    /// Listen on `127.0.0.1:port`. Port 0 picks a free port.
    pub async fn listen(&self, port: u16) -> Result<Listener> {
        self.listen_on(("127.0.0.1", port)).await
    }

    /// Listen on any address.
    pub async fn listen_on<A: ToSocketAddrs>(&self, addr: A) -> Result<Listener> {
        let listener = tcp::bind(addr).await?;
        tracing::debug!("Listening on {:?}", listener.local_addr().ok());
        Ok(Listener::new(Acceptor::Tcp(listener), self.clone()))
    }

    /// Connect to a Unix socket path.
    #[cfg(unix)]
    pub async fn connect_unix(&self, path: &str) -> Result<Connection> {
        let stream = unix::connect(path, self.config.connect_timeout).await?;
        Ok(self.start(SocketTransport::new(stream)))
    }

    /// Listen on a Unix socket path. The socket file is removed when the
    /// listener is dropped.
    #[cfg(unix)]
    pub async fn listen_unix(&self, path: &str) -> Result<Listener> {
        let listener = UnixSocketListener::bind(path).await?;
        tracing::debug!("Listening on {}", path);
        Ok(Listener::new(Acceptor::Unix(listener), self.clone()))
    }

    fn start<T: crate::transport::Transport>(&self, transport: SocketTransport<T>) -> Connection {
        Connection::start(transport, self.config.clone(), self.registry.clone())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketListener),
}

/// Accepts inbound connections; each one is independent.
pub struct Listener {
    acceptor: Acceptor,
    manager: ConnectionManager,
    stop: ShutdownSignal,
}

impl Listener {
    fn new(acceptor: Acceptor, manager: ConnectionManager) -> Self {
        Self {
            acceptor,
            manager,
            stop: ShutdownSignal::new(),
        }
    }

    /// Bound TCP address (`None` for a Unix socket listener).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Acceptor::Unix(_) => None,
        }
    }

    /// Bound port, for listeners created with port 0.
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Socket path of a Unix socket listener.
    #[cfg(unix)]
    pub fn path(&self) -> Option<&str> {
        match &self.acceptor {
            Acceptor::Unix(listener) => Some(listener.path()),
            Acceptor::Tcp(_) => None,
        }
    }

    /// Wait for the next peer.
    ///
    /// Fails with `ConnectionClosed` once the listener is stopped.
    pub async fn accept(&self) -> Result<Connection> {
        if self.stop.is_triggered() {
            return Err(IpcError::ConnectionClosed);
        }

        tokio::select! {
            biased;
            _ = self.stop.triggered() => Err(IpcError::ConnectionClosed),
            accepted = self.accept_one() => accepted,
        }
    }

    async fn accept_one(&self) -> Result<Connection> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => {
                let transport = SocketTransport::accept(listener).await?;
                Ok(self.manager.start(transport))
            }
            #[cfg(unix)]
            Acceptor::Unix(listener) => {
                let stream = listener.accept().await?;
                Ok(self.manager.start(SocketTransport::new(stream)))
            }
        }
    }

    /// Hand every accepted connection to `on_connection` until stopped.
    ///
    /// Accept failures are logged and the loop carries on.
    pub async fn accept_loop<F>(&self, mut on_connection: F)
    where
        F: FnMut(Connection),
    {
        loop {
            match self.accept().await {
                Ok(connection) => on_connection(connection),
                Err(_) if self.stop.is_triggered() => break,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
        tracing::debug!("Accept loop stopped");
    }

    /// A cloneable handle whose `trigger()` stops [`accept`](Self::accept)
    /// and [`accept_loop`](Self::accept_loop).
    pub fn stop_handle(&self) -> ShutdownSignal {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::protocol::Message;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_builder_setters() {
        let manager = ConnectionManager::new()
            .send_capacity(0)
            .receive_capacity(32)
            .send_mode(SendMode::NonBlocking)
            .max_payload_size(4096)
            .close_linger(Duration::from_millis(10))
            .heartbeat(Duration::from_millis(100), Duration::from_millis(500));

        let config = manager.connection_config();
        assert_eq!(config.send_capacity, 1);
        assert_eq!(config.receive_capacity, 32);
        assert_eq!(config.send_mode, SendMode::NonBlocking);
        assert_eq!(config.max_payload_size, 4096);
        assert_eq!(config.close_linger, Duration::from_millis(10));
        assert!(config.heartbeat.is_some());
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let manager = ConnectionManager::new();
        let listener = manager.listen(0).await.unwrap();
        let port = listener.port().unwrap();

        let (client, server) = tokio::join!(manager.connect_to("127.0.0.1", port), listener.accept());
        let client = client.unwrap();
        let server = server.unwrap();

        assert!(client.peer_addr().unwrap().ends_with(&port.to_string()));
        client.send(Message::from_slice(1, b"hi")).await.unwrap();
        let message = server.receive(Some(WAIT)).await.unwrap().unwrap();
        assert_eq!(message.body(), b"hi");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = ConnectionManager::new().connect_to("127.0.0.1", port).await;
        assert!(matches!(result, Err(IpcError::ConnectRefused { .. })));
    }

    #[tokio::test]
    async fn test_stopped_listener_rejects_accept() {
        let listener = ConnectionManager::new().listen(0).await.unwrap();
        let stop = listener.stop_handle();

        stop.trigger();

        let result = tokio::time::timeout(WAIT, listener.accept()).await.unwrap();
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_accept_loop_hands_out_independent_connections() {
        let manager = ConnectionManager::new();
        let listener = Arc::new(manager.listen(0).await.unwrap());
        let port = listener.port().unwrap();
        let stop = listener.stop_handle();

        let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();
        let acceptor = {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener
                    .accept_loop(|connection| {
                        let _ = accepted_tx.send(connection);
                    })
                    .await;
            })
        };

        let first = manager.connect_to("127.0.0.1", port).await.unwrap();
        let second = manager.connect_to("127.0.0.1", port).await.unwrap();
        let server_first = accepted_rx.recv().await.unwrap();
        let server_second = accepted_rx.recv().await.unwrap();

        first.send(Message::from_slice(1, b"one")).await.unwrap();
        second.send(Message::from_slice(2, b"two")).await.unwrap();
        assert_eq!(
            server_first.receive(Some(WAIT)).await.unwrap().unwrap().body(),
            b"one"
        );
        assert_eq!(
            server_second.receive(Some(WAIT)).await.unwrap().unwrap().body(),
            b"two"
        );

        // Closing one leaves the other untouched.
        first.close().await;
        assert_eq!(server_first.wait_closed().await, ConnectionState::Closed);
        assert!(server_second.is_connected());

        stop.trigger();
        tokio::time::timeout(WAIT, acceptor).await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_round_trip() {
        let path = unix::generate_socket_path();
        let manager = ConnectionManager::new();
        let listener = manager.listen_unix(&path).await.unwrap();
        assert_eq!(listener.path(), Some(path.as_str()));
        assert!(listener.local_addr().is_none());

        let (client, server) = tokio::join!(manager.connect_unix(&path), listener.accept());
        let client = client.unwrap();
        let server = server.unwrap();

        server.send(Message::from_slice(5, b"over unix")).await.unwrap();
        let message = client.receive(Some(WAIT)).await.unwrap().unwrap();
        assert_eq!(message.type_id(), 5);
        assert_eq!(message.body(), b"over unix");
    }
}
