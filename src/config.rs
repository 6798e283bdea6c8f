//! Configuration for transport and dispatch components.
//!
//! All knobs are explicit constructor parameters carried by these structs;
//! nothing reads ambient process-wide state. The clock-skew hour offset in
//! particular is plain configuration here rather than an environment flag.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;

/// Configuration for an outbound (client) SPA endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Legacy peer host name or address.
    pub host: String,
    /// Legacy peer TCP port.
    pub port: u16,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// How long a request/response exchange may take before timing out.
    pub request_timeout: Duration,
    /// Read buffer size for response reassembly.
    pub buffer_size: usize,
    /// Maximum accepted declared message length.
    pub max_message_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9400,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            buffer_size: 64 * 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the common host/port case.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

/// Configuration for an inbound (server) SPA endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local address to listen on.
    pub bind_addr: SocketAddr,
    /// Read buffer size per peer connection.
    pub buffer_size: usize,
    /// Maximum accepted declared message length.
    pub max_message_size: u32,
    /// Peers idle longer than this are evicted by the sweep task.
    pub idle_timeout: Duration,
    /// How often the registry sweep runs.
    pub sweep_interval: Duration,
    /// Clock-skew correction (hours) applied to badge timestamps before
    /// staleness comparison. Zero in the primary deployment environment.
    pub hour_offset: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9400".parse().expect("valid default bind addr"),
            buffer_size: 64 * 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            hour_offset: 0,
        }
    }
}

/// Which dispatch queue implementation to run.
///
/// Configuration must select exactly one; the two variants give no ordering
/// guarantee relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Unbounded async queue, consumer wakes immediately on new items.
    Async,
    /// Lock-free queue polled with a sleep when empty.
    Polling,
}

/// Configuration for the dispatch queue / worker pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Selected queue implementation.
    pub kind: QueueKind,
    /// Sleep between polls when the polling queue is empty.
    pub poll_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Async,
            poll_delay: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 9400);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_client_config_new() {
        let config = ClientConfig::new("legacy-gw.internal", 7001);
        assert_eq!(config.host, "legacy-gw.internal");
        assert_eq!(config.port, 7001);
        assert_eq!(config.buffer_size, 64 * 1024);
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.hour_offset, 0);
        assert!(config.idle_timeout > config.sweep_interval);
    }

    #[test]
    fn test_queue_kind_deserializes_snake_case() {
        let kind: QueueKind = serde_json::from_str("\"polling\"").unwrap();
        assert_eq!(kind, QueueKind::Polling);
        let kind: QueueKind = serde_json::from_str("\"async\"").unwrap();
        assert_eq!(kind, QueueKind::Async);
    }

    #[test]
    fn test_queue_config_default_is_async() {
        let config = QueueConfig::default();
        assert_eq!(config.kind, QueueKind::Async);
    }
}
