//! Settings types. Field names are camelCase in the settings file.

use serde::{Deserialize, Serialize};
use wsreq_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsreqSettings {
    /// Responder settings.
    pub server: ServerSettings,
    /// Initiator settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl WsreqSettings {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        if let Some(origin) = &self.client.origin {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(SettingsError::InvalidValue(format!(
                    "client.origin must be an http(s) URL: {origin}"
                )));
            }
        }
        Ok(())
    }
}

/// Responder network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Upgrade path for the protocol endpoint.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Milliseconds to wait for the peer to answer our close frame.
    pub close_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 64,
            shutdown_timeout_secs: 30,
            close_timeout_ms: 5_000,
        }
    }
}

/// Initiator settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// HTTP origin that `/`-prefixed request paths are resolved against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
