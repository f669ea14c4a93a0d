//! Application message handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_core::envelope::is_reserved_type;
use tether_core::errors::ProtocolError;
use tether_core::ids::SessionKey;

use crate::session::Session;

/// Handler for one inbound message type.
///
/// A session runs its handlers one at a time, in arrival order, on a task
/// of its own, so a handler may await a request to the same peer. Any
/// `Fn(Value, Responder) -> impl Future` closure implements this trait.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle `data`. Call [`Responder::respond`] to answer the sender.
    async fn handle(&self, data: Value, responder: Responder);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Value, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, data: Value, responder: Responder) {
        (self)(data, responder).await;
    }
}

/// One-shot reply capability for an inbound message.
///
/// `respond` consumes the responder, so a message is answered at most once.
/// Dropping it without responding sends nothing.
pub struct Responder {
    session: Arc<Session>,
    request_type: String,
    sequence_id: u64,
}

impl Responder {
    pub(crate) fn new(session: Arc<Session>, request_type: String, sequence_id: u64) -> Self {
        Self {
            session,
            request_type,
            sequence_id,
        }
    }

    /// Send `"<type>-response"` answering the original message. Returns the
    /// sequence id stamped on the reply.
    pub fn respond(self, data: Value) -> u64 {
        self.session
            .send_reply(&self.request_type, self.sequence_id, data)
    }

    /// Which peer sent the message.
    pub fn session_key(&self) -> &SessionKey {
        self.session.key()
    }

    /// Session the message arrived on.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Type of the message being answered.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Sequence id of the message being answered.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }
}

/// Handlers keyed by message type, applied to sessions as a group.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for `message_type`.
    pub fn insert(
        &mut self,
        message_type: impl Into<String>,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), ProtocolError> {
        let message_type = message_type.into();
        if is_reserved_type(&message_type) {
            return Err(ProtocolError::ReservedType(message_type));
        }
        let _ = self.handlers.insert(message_type, Arc::new(handler));
        Ok(())
    }

    /// Handler for `message_type`, if any.
    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    /// Iterate over `(type, handler)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn MessageHandler>)> {
        self.handlers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn merge_from(&mut self, other: &HandlerSet) {
        for (message_type, handler) in &other.handlers {
            let _ = self
                .handlers
                .insert(message_type.clone(), Arc::clone(handler));
        }
    }
}
