//! Session registry for the accepting endpoint.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use parking_lot::RwLock;
use serde_json::Value;
use tether_core::ids::SessionKey;
use tether_session::{HandlerSet, Session, SessionConfig, Transport};
use tracing::{debug, info};

type DisconnectHook = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Sessions keyed by the peer-supplied [`SessionKey`].
///
/// Entries are never removed on disconnect; a peer reconnecting under the
/// same key gets its old session back with the new socket bound.
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
    config: SessionConfig,
    disconnect_hooks: RwLock<Vec<DisconnectHook>>,
}

impl SessionRegistry {
    /// Empty registry; new sessions use `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            disconnect_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Run `hook` whenever a session loses its live connection.
    pub fn on_disconnect(&self, hook: impl Fn(&Arc<Session>) + Send + Sync + 'static) {
        self.disconnect_hooks.write().push(Arc::new(hook));
    }

    /// Tell the disconnect hooks that `session` was detached.
    pub fn notify_disconnect(&self, session: &Arc<Session>) {
        let hooks = self.disconnect_hooks.read().clone();
        debug!(session_key = %session.key(), hooks = hooks.len(), "session disconnected");
        for hook in hooks {
            hook(session);
        }
    }

    /// Look up or create the session for `key` and bind `transport` to it.
    ///
    /// `handlers` are applied on every call, so handler changes reach
    /// resumed sessions too.
    pub fn register_or_attach(
        &self,
        key: SessionKey,
        transport: Arc<dyn Transport>,
        handlers: &HandlerSet,
    ) -> Arc<Session> {
        let (session, resumed) = match self.sessions.entry(key) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), true),
            Entry::Vacant(entry) => {
                let session = Session::new(entry.key().clone(), self.config.clone());
                let _ = entry.insert(Arc::clone(&session));
                (session, false)
            }
        };

        session.register_handlers(handlers);
        session.attach(transport);
        if resumed {
            counter!("tether_sessions_resumed_total").increment(1);
            info!(session_key = %session.key(), "session resumed");
        } else {
            counter!("tether_sessions_created_total").increment(1);
            info!(session_key = %session.key(), "session created");
        }
        session
    }

    /// Send `message_type` to every connected session. Returns how many
    /// sessions it was sent to.
    pub fn broadcast(&self, message_type: &str, data: &Value) -> usize {
        let recipients = self.connected_sessions();
        for session in &recipients {
            let _ = session.send(message_type, data.clone());
        }
        counter!("tether_broadcasts_total").increment(1);
        debug!(message_type, recipients = recipients.len(), "broadcast");
        recipients.len()
    }

    /// Snapshot of connected sessions.
    pub fn connected_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of every session.
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Session for `key`.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of connected sessions.
    pub fn connected_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;
    use tether_core::envelope::{Envelope, decode};
    use tether_core::errors::TransportError;
    use tether_session::Responder;

    use super::*;

    struct FakeSocket {
        id: String,
        frames: Mutex<Vec<Envelope>>,
    }

    impl FakeSocket {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                frames: Mutex::new(Vec::new()),
            })
        }

        fn types(&self) -> Vec<String> {
            self.frames
                .lock()
                .iter()
                .map(|e| e.message_type.clone())
                .collect()
        }
    }

    impl Transport for FakeSocket {
        fn id(&self) -> &str {
            &self.id
        }
        fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
            self.frames.lock().push(decode(&frame).unwrap());
            Ok(())
        }
        fn close(&self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn register_creates_once_per_key() {
        let registry = registry();
        let handlers = HandlerSet::new();
        let a = registry.register_or_attach("k".into(), FakeSocket::new("c1"), &handlers);
        let b = registry.register_or_attach("k".into(), FakeSocket::new("c2"), &handlers);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(b.transport_id().as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn resume_keeps_sequence_counter() {
        let registry = registry();
        let handlers = HandlerSet::new();
        let first = FakeSocket::new("c1");
        let session = registry.register_or_attach("k".into(), first.clone(), &handlers);
        let _ = session.send("a", json!({}));
        assert!(session.detach("c1"));

        let second = FakeSocket::new("c2");
        let resumed = registry.register_or_attach("k".into(), second.clone(), &handlers);
        assert_eq!(resumed.send("b", json!({})), 1);
        assert_eq!(second.frames.lock()[0].sequence_id, 1);
    }

    #[tokio::test]
    async fn handlers_are_reapplied_on_resume() {
        let registry = registry();
        let session = registry.register_or_attach("k".into(), FakeSocket::new("c1"), &HandlerSet::new());
        assert!(!session.has_handler("late"));

        let mut handlers = HandlerSet::new();
        handlers
            .insert("late", |_d: Value, _r: Responder| async {})
            .unwrap();
        let _ = registry.register_or_attach("k".into(), FakeSocket::new("c2"), &handlers);
        assert!(session.has_handler("late"));
    }

    #[tokio::test]
    async fn broadcast_reaches_only_connected_sessions() {
        let registry = registry();
        let handlers = HandlerSet::new();
        let sockets: Vec<_> = (0..3).map(|i| FakeSocket::new(&format!("c{i}"))).collect();
        for (i, socket) in sockets.iter().enumerate() {
            let _ = registry.register_or_attach(format!("peer-{i}").into(), socket.clone(), &handlers);
        }
        assert!(registry.get(&"peer-1".into()).unwrap().detach("c1"));

        let sent = registry.broadcast("notice", &json!({"n": 1}));
        assert_eq!(sent, 2);
        assert_eq!(sockets[0].types(), vec!["notice"]);
        assert!(sockets[1].types().is_empty());
        assert_eq!(sockets[2].types(), vec!["notice"]);
        assert_eq!(registry.connected_count(), 2);
        assert_eq!(registry.all_sessions().len(), 3);
    }

    #[tokio::test]
    async fn disconnect_hooks_see_the_session() {
        let registry = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on_disconnect(move |session| sink.lock().push(session.key().to_string()));

        let session = registry.register_or_attach("k".into(), FakeSocket::new("c1"), &HandlerSet::new());
        assert!(session.detach("c1"));
        registry.notify_disconnect(&session);
        assert_eq!(*seen.lock(), vec!["k".to_owned()]);
    }

    #[test]
    fn broadcast_with_no_sessions_is_noop() {
        let registry = registry();
        assert_eq!(registry.broadcast("notice", &json!({})), 0);
        assert!(registry.is_empty());
    }
}
