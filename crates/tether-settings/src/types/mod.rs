//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON files are accepted and missing fields keep their default value.

mod protocol;
mod server;

pub use protocol::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "protocol": { "disconnectOnLivenessTimeout": true }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Acceptor network settings.
    pub server: ServerSettings,
    /// Session protocol timings and policies.
    pub protocol: ProtocolSettings,
    /// Client reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject combinations that would make the protocol misbehave.
    pub fn validate(&self) -> Result<()> {
        let p = &self.protocol;
        if p.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be positive".into(),
            ));
        }
        if p.liveness_timeout_ms <= p.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "livenessTimeoutMs ({}) must exceed heartbeatIntervalMs ({})",
                p.liveness_timeout_ms, p.heartbeat_interval_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor ({}) must be within 0.0..=1.0",
                self.reconnect.jitter_factor
            )));
        }
        Ok(())
    }
}
