//! Protocol-level constants.

/// Current version of Tether (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved heartbeat message type.
pub const PING_TYPE: &str = "ping";

/// Suffix appended to a message type to form its reply type.
pub const RESPONSE_SUFFIX: &str = "-response";

/// Interval between outgoing heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_500;

/// Silence window after which the peer is considered unresponsive.
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 10_000;

/// How long `request()` waits for a correlated reply.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Minimum spacing between two outbound sends on the client queue.
pub const DEFAULT_MIN_SEND_INTERVAL_MS: u64 = 200;
