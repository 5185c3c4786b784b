//! TCP connect/accept with error classification.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::{IpcError, Result};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `host:port` within `timeout`.
///
/// Refusal and timeout are reported as distinct errors; everything else
/// is `Io`. `TCP_NODELAY` is enabled since frames are small and latency
/// matters more than packet count.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Err(_) => return Err(IpcError::ConnectTimeout { addr, timeout }),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            return Err(IpcError::ConnectRefused { addr })
        }
        Ok(Err(e)) => return Err(IpcError::Io(e)),
        Ok(Ok(stream)) => stream,
    };

    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {}", addr);
    Ok(stream)
}

/// Bind a listening socket.
pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Accept one inbound connection.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    tracing::debug!("Accepted connection from {}", addr);
    Ok((stream, addr))
}
