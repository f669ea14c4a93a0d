//! Session protocol and reconnect settings.

use serde::{Deserialize, Serialize};
use tether_core::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_MIN_SEND_INTERVAL_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
use tether_core::retry::{
    BackoffConfig, DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY_MS,
};

/// Timings and policies shared by both endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    /// Interval between outgoing `ping` envelopes.
    pub heartbeat_interval_ms: u64,
    /// Silence window before the peer is declared unresponsive.
    pub liveness_timeout_ms: u64,
    /// How long `request()` waits for a reply.
    pub request_timeout_ms: u64,
    /// Minimum spacing between client outbound sends.
    pub min_send_interval_ms: u64,
    /// Close the transport when the liveness timer fires (otherwise log only).
    pub disconnect_on_liveness_timeout: bool,
    /// Reject in-flight requests immediately on close (otherwise they time out).
    pub reject_pending_on_close: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            min_send_interval_ms: DEFAULT_MIN_SEND_INTERVAL_MS,
            disconnect_on_liveness_timeout: false,
            reject_pending_on_close: false,
        }
    }
}

/// Client reconnect backoff settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay.
    pub max_delay_ms: u64,
    /// Symmetric jitter applied to each delay (0.0–1.0).
    pub jitter_factor: f64,
    /// Stop after this many consecutive failures (`null` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: None,
        }
    }
}

impl From<&ReconnectSettings> for BackoffConfig {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            base_delay_ms: s.base_delay_ms,
            max_delay_ms: s.max_delay_ms,
            jitter_factor: s.jitter_factor,
            max_attempts: s.max_attempts,
        }
    }
}
