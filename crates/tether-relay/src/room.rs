//! Chat room handlers served by `tether-relay serve`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_core::errors::ProtocolError;
use tether_core::ids::SessionKey;
use tether_core::logging::RecentLogs;
use tether_server::SessionRegistry;
use tether_session::{HandlerSet, Responder};
use tracing::{debug, info};

/// Display names by session, plus the registry used to fan messages out.
///
/// The registry is set once the server exists; until then broadcasts are
/// dropped.
#[derive(Default)]
pub struct Room {
    names: Mutex<HashMap<SessionKey, String>>,
    registry: OnceLock<Arc<SessionRegistry>>,
}

impl Room {
    /// Empty room, not yet bound to a registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind the registry broadcasts go through and announce departures
    /// seen by it. Later calls are ignored.
    pub fn bind(self: &Arc<Self>, registry: Arc<SessionRegistry>) {
        let room = Arc::downgrade(self);
        if self.registry.set(Arc::clone(&registry)).is_ok() {
            registry.on_disconnect(move |session| {
                if let Some(room) = room.upgrade() {
                    room.departed(session.key());
                }
            });
        }
    }

    /// Name recorded for `key`, falling back to the key itself.
    pub fn name_of(&self, key: &SessionKey) -> String {
        self.names
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn identify(&self, key: &SessionKey, name: String) {
        let _ = self.names.lock().insert(key.clone(), name);
    }

    fn departed(&self, key: &SessionKey) {
        let name = self.names.lock().get(key).cloned();
        match name {
            Some(name) => info!("{name} has disconnected."),
            None => debug!(session_key = %key, "anonymous peer disconnected"),
        }
    }

    fn broadcast(&self, message_type: &str, data: &Value) -> usize {
        match self.registry.get() {
            Some(registry) => registry.broadcast(message_type, data),
            None => 0,
        }
    }
}

/// `identify`, `chat-message`, `echo` and `logs`.
pub fn relay_handlers(room: &Arc<Room>, logs: RecentLogs) -> Result<HandlerSet, ProtocolError> {
    let mut handlers = HandlerSet::new();

    let identify_room = Arc::clone(room);
    handlers.insert("identify", move |data: Value, responder: Responder| {
        let room = Arc::clone(&identify_room);
        async move {
            let name = data["name"]
                .as_str()
                .map_or_else(|| responder.session_key().to_string(), str::to_owned);
            room.identify(responder.session_key(), name.clone());
            info!(session_key = %responder.session_key(), "{name} has connected.");
            let reached = room.broadcast("connection-notice", &json!({ "name": name }));
            debug!(reached, "connection notice sent");
        }
    })?;

    let chat_room = Arc::clone(room);
    handlers.insert("chat-message", move |data: Value, responder: Responder| {
        let room = Arc::clone(&chat_room);
        async move {
            let name = room.name_of(responder.session_key());
            let text = data["text"].as_str().unwrap_or_default().to_owned();
            info!("[{name}] {text}");
            let reached = room.broadcast("chat-message", &json!({ "name": name, "text": text }));
            debug!(reached, "chat message relayed");
        }
    })?;

    handlers.insert("echo", |data: Value, responder: Responder| async move {
        let _ = responder.respond(data);
    })?;

    handlers.insert("logs", move |_data: Value, responder: Responder| {
        let records = serde_json::to_value(logs.snapshot()).unwrap_or_default();
        async move {
            let _ = responder.respond(records);
        }
    })?;

    Ok(handlers)
}
