//! Server configuration.

use tether_session::SessionConfig;
use tether_settings::TetherSettings;

/// Configuration for [`TetherServer`](crate::TetherServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` = auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound frame buffer.
    pub channel_capacity: usize,
    /// Protocol settings applied to every session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            channel_capacity: 256,
            session: SessionConfig::default(),
        }
    }
}

impl From<&TetherSettings> for ServerConfig {
    fn from(settings: &TetherSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            channel_capacity: settings.server.channel_capacity,
            session: SessionConfig::from(&settings.protocol),
        }
    }
}
