//! Connection configuration.
//!
//! Every field has a default, so a JSON document only needs the values it
//! changes. Durations are written as whole milliseconds:
//!
//! ```
//! use msgwire::{ConnectionConfig, SendMode};
//!
//! let config = ConnectionConfig::from_json(
//!     r#"{ "send_capacity": 32, "send_mode": "non_blocking",
//!          "heartbeat": { "interval_ms": 250, "timeout_ms": 1000 } }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.send_capacity, 32);
//! assert_eq!(config.send_mode, SendMode::NonBlocking);
//! assert_eq!(config.receive_capacity, 10);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::transport::tcp::DEFAULT_CONNECT_TIMEOUT;

/// Default time `close()` lets the writer flush queued messages.
pub const DEFAULT_CLOSE_LINGER: Duration = Duration::from_millis(500);

/// Smallest read buffer the reader task will start with.
const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Shortest keep-alive interval accepted.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// What `send` does when the send queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Wait for space (backpressure reaches the caller).
    #[default]
    Blocking,
    /// Fail immediately with `QueueFull`.
    NonBlocking,
}

/// Keep-alive settings.
///
/// Both ends should enable it: a peer that never writes looks exactly
/// like a dead one. `timeout` should be a few multiples of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Idle time after which the writer sends a keep-alive frame.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Silence from the peer after which the connection fails.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl HeartbeatConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Send queue capacity (minimum 1).
    pub send_capacity: usize,
    /// Receive queue capacity (minimum 1).
    pub receive_capacity: usize,
    pub send_mode: SendMode,
    /// Largest body accepted in either direction.
    pub max_payload_size: u32,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// How long `close()` waits for queued messages to be written.
    #[serde(rename = "close_linger_ms", with = "millis")]
    pub close_linger: Duration,
    /// Initial capacity of the reader's buffer.
    pub read_buffer_size: usize,
    /// Keep-alive; disabled when `None`.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_capacity: DEFAULT_QUEUE_CAPACITY,
            receive_capacity: DEFAULT_QUEUE_CAPACITY,
            send_mode: SendMode::Blocking,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_linger: DEFAULT_CLOSE_LINGER,
            read_buffer_size: DEFAULT_BUFFER_CAPACITY,
            heartbeat: None,
        }
    }
}

impl ConnectionConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp values into their usable ranges.
    pub(crate) fn normalized(mut self) -> Self {
        self.send_capacity = self.send_capacity.max(1);
        self.receive_capacity = self.receive_capacity.max(1);
        self.read_buffer_size = self.read_buffer_size.max(MIN_READ_BUFFER_SIZE);

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.interval = heartbeat.interval.max(MIN_HEARTBEAT_INTERVAL);
            if heartbeat.timeout <= heartbeat.interval {
                tracing::warn!(
                    "Heartbeat timeout {:?} is not longer than interval {:?}; idle peers will time out",
                    heartbeat.timeout,
                    heartbeat.interval
                );
            }
        }
        self
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
