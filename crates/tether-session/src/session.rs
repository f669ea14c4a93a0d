//! Logical session with one remote peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tether_core::constants::PING_TYPE;
use tether_core::envelope::{Envelope, decode, encode};
use tether_core::errors::{ProtocolError, TransportError};
use tether_core::ids::SessionKey;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::connection::{SendGuard, Transport};
use crate::handler::{HandlerSet, MessageHandler, Responder};
use crate::heartbeat::HeartbeatTimers;
use crate::pending::PendingRequests;
use crate::runner::HandlerRunner;

/// Outcome of [`Session::handle_message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A reply resolved the pending request with this sequence id.
    Resolved(u64),
    /// A reply matched no pending request.
    Orphan(u64),
    /// A heartbeat re-armed the liveness timer.
    Ping,
    /// The message was queued for the handler registered for this type.
    Handled(String),
    /// No handler was registered for this type.
    Unhandled(String),
    /// The frame could not be decoded.
    Malformed,
}

struct SessionState {
    next_sequence_id: u64,
    transport: Option<Arc<dyn Transport>>,
    heartbeat: HeartbeatTimers,
}

/// One remote peer, identified by a [`SessionKey`], across any number of
/// physical connections.
///
/// Sequence allocation, transport binding and timer arming all happen
/// under one lock, so frames reach the transport in sequence order.
pub struct Session {
    key: SessionKey,
    config: SessionConfig,
    state: Mutex<SessionState>,
    pending: PendingRequests,
    handlers: RwLock<HandlerSet>,
    runner: HandlerRunner,
    connected: AtomicBool,
    liveness_timeouts: AtomicU64,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(key: SessionKey, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            runner: HandlerRunner::new(key.clone()),
            key,
            config,
            state: Mutex::new(SessionState {
                next_sequence_id: 0,
                transport: None,
                heartbeat: HeartbeatTimers::default(),
            }),
            pending: PendingRequests::new(),
            handlers: RwLock::new(HandlerSet::new()),
            connected: AtomicBool::new(false),
            liveness_timeouts: AtomicU64::new(0),
        })
    }

    /// Session key.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Protocol configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a transport is bound and has not closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sequence id the next outgoing envelope will carry.
    pub fn next_sequence_id(&self) -> u64 {
        self.state.lock().next_sequence_id
    }

    /// How many times the liveness timer has fired.
    pub fn liveness_timeouts(&self) -> u64 {
        self.liveness_timeouts.load(Ordering::Relaxed)
    }

    /// Outstanding requests.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Id of the bound transport.
    pub fn transport_id(&self) -> Option<String> {
        self.state
            .lock()
            .transport
            .as_ref()
            .map(|t| t.id().to_owned())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Bind (or rebind) `transport` and enter the connected state.
    ///
    /// Both heartbeat timers are re-armed; any previous ones are cancelled.
    /// A replaced transport with a different id is closed. The sequence
    /// counter, pending requests and handlers are untouched.
    pub fn attach(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let mut state = self.state.lock();
        let connection = transport.id().to_owned();
        let rebind = state.transport.is_some();
        let replaced = state
            .transport
            .replace(transport)
            .filter(|old| old.id() != connection);
        state.heartbeat.cancel_all();
        state
            .heartbeat
            .arm_ping(self, self.config.heartbeat_interval);
        state
            .heartbeat
            .arm_liveness(self, self.config.liveness_timeout);
        self.connected.store(true, Ordering::Release);
        drop(state);
        if let Some(old) = replaced {
            debug!(session_key = %self.key, connection_id = old.id(), "closing replaced connection");
            old.close();
        }
        info!(session_key = %self.key, connection_id = %connection, rebind, "session attached");
    }

    /// Transport-close notification for `connection_id`.
    ///
    /// Ignored unless `connection_id` is the bound transport, so a stale
    /// socket closing after a reconnect cannot tear down its successor.
    pub fn detach(&self, connection_id: &str) -> bool {
        {
            let mut state = self.state.lock();
            match &state.transport {
                Some(t) if t.id() == connection_id => {}
                _ => {
                    debug!(session_key = %self.key, connection_id, "ignoring close of stale connection");
                    return false;
                }
            }
            state.heartbeat.cancel_all();
            self.connected.store(false, Ordering::Release);
        }
        info!(session_key = %self.key, connection_id, "session detached");
        self.reject_pending_if_configured();
        true
    }

    /// Close the bound transport and enter the disconnected state. Idempotent.
    pub fn close(&self) {
        let transport = {
            let mut state = self.state.lock();
            state.heartbeat.cancel_all();
            state.transport.clone()
        };
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(transport) = transport {
            transport.close();
        }
        if was_connected {
            info!(session_key = %self.key, "session closed");
        }
        self.reject_pending_if_configured();
    }

    fn reject_pending_if_configured(&self) {
        if self.config.reject_pending_on_close {
            let cancelled = self.pending.cancel_all();
            if cancelled > 0 {
                debug!(session_key = %self.key, cancelled, "rejected pending requests on close");
            }
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a message. Returns the sequence id it carries.
    ///
    /// Delivery is fire-and-forget: transport failures are logged, not
    /// returned.
    pub fn send(&self, message_type: &str, data: Value) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_sequence_id;
        let (seq, _) = self.emit_locked(&mut state, Envelope::new(message_type, seq, data), None);
        seq
    }

    /// Send a message that the outbound queue discards if `guard` no
    /// longer holds at dispatch time.
    pub fn send_guarded(&self, message_type: &str, data: Value, guard: SendGuard) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_sequence_id;
        let (seq, _) =
            self.emit_locked(&mut state, Envelope::new(message_type, seq, data), Some(guard));
        seq
    }

    pub(crate) fn send_reply(&self, request_type: &str, answering: u64, data: Value) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_sequence_id;
        let (seq, _) = self.emit_locked(
            &mut state,
            Envelope::reply(request_type, seq, answering, data),
            None,
        );
        seq
    }

    /// Send a message and wait for the peer's `"<type>-response"`.
    ///
    /// Resolves with the reply's `data`. Fails with
    /// [`ProtocolError::RequestTimeout`] when no reply arrives within the
    /// configured window. Either way the pending entry is gone afterwards.
    pub async fn request(&self, message_type: &str, data: Value) -> Result<Value, ProtocolError> {
        let (seq, rx) = {
            let mut state = self.state.lock();
            let seq = state.next_sequence_id;
            let rx = self.pending.register(seq);
            let (seq, sent) =
                self.emit_locked(&mut state, Envelope::new(message_type, seq, data), None);
            if let Err(err) = sent {
                let _ = self.pending.remove(seq);
                return Err(err.into());
            }
            (seq, rx)
        };

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ProtocolError::RequestCancelled(seq)),
            Err(_) => {
                let _ = self.pending.remove(seq);
                let timeout_ms =
                    u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(ProtocolError::RequestTimeout {
                    sequence_id: seq,
                    message_type: message_type.to_owned(),
                    timeout_ms,
                })
            }
        }
    }

    /// Stamp the next sequence id on `envelope` and hand it to the transport.
    ///
    /// The caller holds the state lock for the whole call, which is what
    /// keeps transport order equal to sequence order.
    fn emit_locked(
        &self,
        state: &mut SessionState,
        mut envelope: Envelope,
        guard: Option<SendGuard>,
    ) -> (u64, Result<(), TransportError>) {
        let seq = state.next_sequence_id;
        state.next_sequence_id += 1;
        envelope.sequence_id = seq;

        let frame = match encode(&envelope) {
            Ok(frame) => Arc::new(frame),
            Err(err) => {
                warn!(session_key = %self.key, error = %err, "failed to encode envelope");
                return (seq, Ok(()));
            }
        };

        let Some(transport) = state.transport.as_ref() else {
            debug!(session_key = %self.key, message_type = %envelope.message_type, sequence_id = seq, "no transport bound, dropping");
            return (seq, Err(TransportError::NotBound));
        };

        let result = match guard {
            Some(guard) => transport.send_guarded(frame, guard),
            None => transport.send(frame),
        };
        match &result {
            Ok(()) if envelope.message_type == PING_TYPE => {
                trace!(session_key = %self.key, sequence_id = seq, "ping sent");
            }
            Ok(()) => debug!(
                session_key = %self.key,
                message_type = %envelope.message_type,
                sequence_id = seq,
                response_id = envelope.response_id,
                "sent"
            ),
            Err(err) => debug!(
                session_key = %self.key,
                message_type = %envelope.message_type,
                sequence_id = seq,
                error = %err,
                error_kind = err.kind(),
                "frame not delivered"
            ),
        }
        (seq, result)
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Register the handler for `message_type`.
    pub fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), ProtocolError> {
        self.handlers.write().insert(message_type, handler)
    }

    /// Apply every handler in `handlers`, replacing same-typed ones.
    pub fn register_handlers(&self, handlers: &HandlerSet) {
        self.handlers.write().merge_from(handlers);
    }

    /// Whether a handler is registered for `message_type`.
    pub fn has_handler(&self, message_type: &str) -> bool {
        self.handlers.read().get(message_type).is_some()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Decode and dispatch one inbound frame.
    ///
    /// Replies resolve pending requests and `ping` re-arms the liveness
    /// timer, both inline. Anything else is handed to the registered
    /// handler, which runs on the session's handler task after every handler
    /// dispatched before it. Malformed, orphaned and unhandled frames are
    /// logged and dropped.
    pub fn handle_message(self: &Arc<Self>, raw: &str) -> Dispatch {
        let envelope = match decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(session_key = %self.key, error = %err, error_kind = err.kind(), "dropping frame");
                return Dispatch::Malformed;
            }
        };
        if envelope.message_type == PING_TYPE {
            trace!(session_key = %self.key, sequence_id = envelope.sequence_id, "ping received");
        } else {
            debug!(
                session_key = %self.key,
                message_type = %envelope.message_type,
                sequence_id = envelope.sequence_id,
                response_id = envelope.response_id,
                "received"
            );
        }

        if let Some(response_id) = envelope.response_id {
            if self.pending.resolve(response_id, envelope.data) {
                return Dispatch::Resolved(response_id);
            }
            let err = ProtocolError::OrphanResponse(response_id);
            warn!(session_key = %self.key, error = %err, error_kind = err.kind(), "dropping reply");
            return Dispatch::Orphan(response_id);
        }

        if envelope.message_type == PING_TYPE {
            self.rearm_liveness();
            return Dispatch::Ping;
        }

        let handler = self.handlers.read().get(&envelope.message_type);
        let Some(handler) = handler else {
            let err = ProtocolError::UnhandledType(envelope.message_type.clone());
            warn!(session_key = %self.key, error = %err, error_kind = err.kind(), "dropping message");
            return Dispatch::Unhandled(envelope.message_type);
        };

        let responder = Responder::new(
            Arc::clone(self),
            envelope.message_type.clone(),
            envelope.sequence_id,
        );
        let data = envelope.data;
        self.runner
            .submit(async move { handler.handle(data, responder).await }.boxed());
        Dispatch::Handled(envelope.message_type)
    }

    /// Resolves once every handler dispatched so far has returned.
    pub async fn handlers_settled(&self) {
        self.runner.settled().await;
    }

    // ── Heartbeat ───────────────────────────────────────────────────

    fn rearm_liveness(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if !self.is_connected() {
            return;
        }
        state
            .heartbeat
            .arm_liveness(self, self.config.liveness_timeout);
    }

    pub(crate) fn liveness_expired(&self, generation: u64) {
        let fired = {
            let mut state = self.state.lock();
            self.is_connected() && state.heartbeat.take_expired(generation)
        };
        if fired {
            self.handle_timeout();
        }
    }

    /// React to a silent peer: count it, log it and, if configured, close.
    pub fn handle_timeout(&self) {
        let _ = self.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
        let timeout_ms =
            u64::try_from(self.config.liveness_timeout.as_millis()).unwrap_or(u64::MAX);
        let err = ProtocolError::LivenessTimeout(timeout_ms);
        warn!(session_key = %self.key, error = %err, error_kind = err.kind(), "peer unresponsive");
        if self.config.disconnect_on_liveness_timeout {
            self.close();
        }
    }
}
