//! Unix Domain Socket variant (unix only).
//!
//! Useful when both processes share a host and a filesystem path is
//! easier to hand over than a port.
//!
//! # Example
//!
//! ```ignore
//! use msgwire::transport::unix::{generate_socket_path, UnixSocketListener};
//!
//! let path = generate_socket_path();
//! let listener = UnixSocketListener::bind(&path).await?;
//! let stream = listener.accept().await?;
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::error::{IpcError, Result};

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/msgwire-{pid}-{random}.sock`
pub fn generate_socket_path() -> String {
    let pid = std::process::id();
    let dir = std::env::temp_dir();
    dir.join(format!("msgwire-{}-{:x}.sock", pid, rand_u64()))
        .display()
        .to_string()
}

/// Simple random u64 using system time, process ID and a call counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}

/// Unix Domain Socket listener. Removes its socket file on drop.
pub struct UnixSocketListener {
    listener: UnixListener,
    path: String,
}

impl UnixSocketListener {
    /// Bind to a Unix socket path.
    ///
    /// Removes any existing socket file at the path before binding.
    pub async fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        tracing::debug!("Accepted connection on {}", self.path);
        Ok(stream)
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to a Unix socket path within `timeout`.
pub async fn connect(path: &str, timeout: Duration) -> Result<UnixStream> {
    match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
        Err(_) => Err(IpcError::ConnectTimeout {
            addr: path.to_string(),
            timeout,
        }),
        Ok(Err(e))
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
            ) =>
        {
            Err(IpcError::ConnectRefused {
                addr: path.to_string(),
            })
        }
        Ok(Err(e)) => Err(IpcError::Io(e)),
        Ok(Ok(stream)) => Ok(stream),
    }
}
