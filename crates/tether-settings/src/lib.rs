//! # tether-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_protocol_constants() {
        let settings = TetherSettings::default();
        assert_eq!(settings.protocol.heartbeat_interval_ms, 2_500);
        assert_eq!(settings.protocol.liveness_timeout_ms, 10_000);
        assert_eq!(settings.protocol.request_timeout_ms, 2_000);
        assert_eq!(settings.protocol.min_send_interval_ms, 200);
        assert!(!settings.protocol.disconnect_on_liveness_timeout);
        assert!(!settings.protocol.reject_pending_on_close);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.history_capacity, 100);
        assert!(settings.reconnect.max_attempts.is_none());
    }
}
