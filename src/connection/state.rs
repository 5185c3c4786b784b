//! Connection state machine and counters.
//!
//! ```text
//! Connecting ──► Connected ──► Closing ──► Closed
//!      │             │            │
//!      └─────────────┴────────────┴──────► Error(reason)
//! ```
//!
//! `Closed` and `Error` are terminal. Every transition goes through one
//! `watch` channel, which is both the lock guarding the state and the
//! broadcast that lets applications observe changes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;

/// Why a connection entered the error state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    /// Broken pipe, reset or other OS-level failure.
    Io(String),
    /// Malformed frame header from the peer.
    FrameCorrupt(String),
    /// No traffic within the heartbeat timeout.
    Timeout,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Io(detail) => write!(f, "I/O failure: {}", detail),
            ErrorReason::FrameCorrupt(detail) => write!(f, "corrupt frame: {}", detail),
            ErrorReason::Timeout => write!(f, "heartbeat timeout"),
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
    Error(ErrorReason),
}

impl ConnectionState {
    /// `Closed` or `Error`: no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error(_))
    }

    /// Whether messages can still be enqueued for sending.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// The failure reason, if in the error state.
    pub fn error_reason(&self) -> Option<&ErrorReason> {
        match self {
            ConnectionState::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Closing => f.write_str("closing"),
            ConnectionState::Closed => f.write_str("closed"),
            ConnectionState::Error(reason) => write!(f, "error ({})", reason),
        }
    }
}

/// Single synchronization point for state reads and transitions.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Connecting);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply `next` atomically; returns whether the state changed.
    fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(&ConnectionState) -> Option<ConnectionState>,
    {
        self.tx.send_if_modified(|state| match next(state) {
            Some(new_state) => {
                tracing::debug!("Connection state: {} -> {}", state, new_state);
                *state = new_state;
                true
            }
            None => false,
        })
    }

    /// `Connecting → Connected`.
    pub(crate) fn mark_connected(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Connecting => Some(ConnectionState::Connected),
            _ => None,
        })
    }

    /// `Connecting | Connected → Closing`.
    pub(crate) fn begin_closing(&self) -> bool {
        self.transition(|state| state.is_open().then_some(ConnectionState::Closing))
    }

    /// Any non-terminal state `→ Error(reason)`.
    pub(crate) fn fail(&self, reason: ErrorReason) -> bool {
        self.transition(|state| (!state.is_terminal()).then(|| ConnectionState::Error(reason)))
    }

    /// Any non-terminal state `→ Closed`. Called once both tasks exited.
    pub(crate) fn finish(&self) -> bool {
        self.transition(|state| (!state.is_terminal()).then_some(ConnectionState::Closed))
    }
}

/// Snapshot of a connection's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub keep_alives_sent: u64,
    /// Inbound messages dropped because their type was not registered.
    pub messages_dropped: u64,
}

/// Live counters, updated by the reader and writer tasks.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    keep_alives_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn record_sent(&self, messages: usize, bytes: usize) {
        self.messages_sent
            .fetch_add(messages as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_keep_alive(&self, bytes: usize) {
        self.keep_alives_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            keep_alives_sent: self.keep_alives_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}
