//! Client configuration.

use std::time::Duration;

use tether_core::errors::TransportError;
use tether_core::ids::SessionKey;
use tether_core::retry::BackoffConfig;
use tether_session::SessionConfig;
use tether_settings::TetherSettings;
use url::Url;

/// Query parameter the server reads the session key from.
const SESSION_KEY_PARAM: &str = "client";

/// Configuration for [`Client`](crate::Client).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Identity presented on every dial.
    pub session_key: SessionKey,
    /// Protocol settings for the local session.
    pub session: SessionConfig,
    /// Minimum spacing between outbound sends.
    pub min_send_interval: Duration,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Outbound frame buffer between the queue and the socket writer.
    pub channel_capacity: usize,
}

impl ClientConfig {
    /// Defaults for `url` with a fresh session key.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &TetherSettings::default())
    }

    /// Config for `url` derived from loaded settings.
    pub fn from_settings(url: impl Into<String>, settings: &TetherSettings) -> Self {
        Self {
            url: url.into(),
            session_key: SessionKey::new(),
            session: SessionConfig::from(&settings.protocol),
            min_send_interval: Duration::from_millis(settings.protocol.min_send_interval_ms),
            backoff: BackoffConfig::from(&settings.reconnect),
            channel_capacity: settings.server.channel_capacity,
        }
    }

    /// Use `key` as the session key.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<SessionKey>) -> Self {
        self.session_key = key.into();
        self
    }

    /// URL actually dialled: `url` with `client=<session key>` appended.
    pub fn connect_url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::Connect(format!("invalid url '{}': {e}", self.url)))?;
        let _ = url
            .query_pairs_mut()
            .append_pair(SESSION_KEY_PARAM, self.session_key.as_str());
        Ok(url)
    }
}
