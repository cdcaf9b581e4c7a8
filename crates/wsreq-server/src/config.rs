//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsreq_settings::ServerSettings;

/// Runtime configuration for a [`RequestServer`](crate::server::RequestServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Upgrade path for the protocol endpoint.
    pub path: String,
    /// Upgrades beyond this many live connections get HTTP 503.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Milliseconds a session waits for the peer's close reply after sending
    /// its own close frame before dropping the socket.
    pub close_timeout_ms: u64,
}

impl ServerConfig {
    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Close handshake timeout as a [`Duration`].
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/ws".into(),
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 64,
            shutdown_timeout_secs: 30,
            close_timeout_ms: 5_000,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            path: settings.path.clone(),
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            // mpsc::channel panics on zero capacity
            send_queue_capacity: settings.send_queue_capacity.max(1),
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
            close_timeout_ms: settings.close_timeout_ms,
        }
    }
}
