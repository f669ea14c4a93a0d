//! Per-session protocol configuration.

use std::time::Duration;

use tether_settings::ProtocolSettings;

/// Timings and policies for a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between outgoing pings.
    pub heartbeat_interval: Duration,
    /// Silence window after which the liveness timer fires.
    pub liveness_timeout: Duration,
    /// How long `request()` waits for a reply.
    pub request_timeout: Duration,
    /// Close the transport when the liveness timer fires.
    pub disconnect_on_liveness_timeout: bool,
    /// Reject pending requests as soon as the transport closes.
    pub reject_pending_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ProtocolSettings::default())
    }
}

impl From<&ProtocolSettings> for SessionConfig {
    fn from(p: &ProtocolSettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(p.heartbeat_interval_ms),
            liveness_timeout: Duration::from_millis(p.liveness_timeout_ms),
            request_timeout: Duration::from_millis(p.request_timeout_ms),
            disconnect_on_liveness_timeout: p.disconnect_on_liveness_timeout,
            reject_pending_on_close: p.reject_pending_on_close,
        }
    }
}
