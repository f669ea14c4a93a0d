//! Raw connection handle and the [`Transport`] seam.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tether_core::errors::TransportError;
use tether_core::ids::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Anything a session can hand encoded frames to.
pub trait Transport: Send + Sync {
    /// Identity of the underlying physical connection (or queue).
    fn id(&self) -> &str;

    /// Hand a frame off for delivery. Never blocks.
    fn send(&self, frame: Arc<String>) -> Result<(), TransportError>;

    /// Hand a frame off, delivering it only if `guard` still holds.
    ///
    /// The default checks the guard immediately. Implementations that
    /// buffer (the outbound queue) check it at dispatch time instead.
    /// `on_invalid` may run while the session's state is locked, so it must
    /// not call back into the session synchronously.
    fn send_guarded(&self, frame: Arc<String>, guard: SendGuard) -> Result<(), TransportError> {
        if guard.is_valid() {
            self.send(frame)
        } else {
            guard.reject();
            Ok(())
        }
    }

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Whether frames handed to `send` can still reach the peer.
    fn is_open(&self) -> bool;
}

/// Validity check evaluated right before a conditional frame is sent.
pub struct SendGuard {
    is_valid: Box<dyn Fn() -> bool + Send + Sync>,
    on_invalid: Option<Box<dyn FnOnce() + Send>>,
}

impl SendGuard {
    /// Guard that sends only while `is_valid` returns `true`.
    pub fn new(is_valid: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            is_valid: Box::new(is_valid),
            on_invalid: None,
        }
    }

    /// Callback invoked once if the frame is discarded.
    #[must_use]
    pub fn on_invalid(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_invalid = Some(Box::new(f));
        self
    }

    /// Evaluate the guard.
    pub fn is_valid(&self) -> bool {
        (self.is_valid)()
    }

    /// Discard the guarded frame, running `on_invalid` if set.
    pub fn reject(self) {
        if let Some(f) = self.on_invalid {
            f();
        }
    }
}

impl fmt::Debug for SendGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGuard")
            .field("on_invalid", &self.on_invalid.is_some())
            .finish_non_exhaustive()
    }
}

/// One physical WebSocket connection.
///
/// Frames go through a bounded channel to the socket's writer task. The
/// close token tells the writer to send a Close frame and stop.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Wrap the sending half of a writer channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// Token cancelled when [`Transport::close`] is called.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Total frames dropped because the channel was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Transport for Connection {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(TransportError::BufferFull),
                    TrySendError::Closed(_) => Err(TransportError::Closed),
                }
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}
