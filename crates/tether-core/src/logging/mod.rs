//! Structured logging setup.
//!
//! - [`init_subscriber`] installs a compact stderr `fmt` subscriber
//! - [`init_subscriber_with_history`] additionally keeps the most recent log
//!   events in memory ([`RecentLogs`]) so a server can hand them to peers
//!
//! Protocol code logs with structured fields (`session_key`, `sequence_id`,
//! `message_type`, `error_kind`); heartbeat traffic stays at `trace`.

pub mod history;

pub use history::{LogRecord, RecentLogs};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default number of log events retained by [`RecentLogs`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with stderr output only.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level`.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with stderr output and an in-memory
/// history of the last `capacity` events.
///
/// Returns the [`RecentLogs`] handle. If a global subscriber was already
/// installed the handle is still returned but stays empty.
pub fn init_subscriber_with_history(level: &str, capacity: usize) -> RecentLogs {
    let history = RecentLogs::new(capacity);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt_layer)
        .with(history.layer())
        .try_init();

    history
}
