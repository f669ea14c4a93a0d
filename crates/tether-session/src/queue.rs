//! Rate-limited outbound queue with inbound priority.
//!
//! The initiating endpoint routes both directions through one queue. Each
//! drain pass first dispatches every buffered inbound frame, then sends at
//! most one outbound item, and sends are spaced at least
//! `min_send_interval` apart. A single drain task runs at a time; when the
//! rate limit blocks progress the task exits and one wake-up timer restarts
//! it once the interval has elapsed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::errors::TransportError;
use tether_core::ids::ConnectionId;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::{SendGuard, Transport};

/// Callback receiving raw inbound frames.
///
/// Called from the drain task, so it must not block: long-running work
/// belongs on a task of its own.
pub type InboundHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Outbound queue item.
#[derive(Debug)]
pub enum Outgoing {
    /// Always sent.
    Plain(Arc<String>),
    /// Sent only if the guard still holds at dispatch time.
    Conditional(Arc<String>, SendGuard),
}

impl Outgoing {
    fn into_parts(self) -> (Arc<String>, Option<SendGuard>) {
        match self {
            Self::Plain(frame) => (frame, None),
            Self::Conditional(frame, guard) => (frame, Some(guard)),
        }
    }
}

#[derive(Default)]
struct QueueState {
    inbox: VecDeque<String>,
    outbox: VecDeque<Outgoing>,
    last_send: Option<Instant>,
    draining: bool,
    wake_scheduled: bool,
    transport: Option<Arc<dyn Transport>>,
    inbound: Option<InboundHandler>,
}

enum Step {
    Inbound(String, Option<InboundHandler>),
    Outbound(Outgoing, Option<Arc<dyn Transport>>),
    Idle,
}

/// Two-lane message queue sitting between a session and its connection.
pub struct OutboundQueue {
    id: ConnectionId,
    min_send_interval: Duration,
    state: Mutex<QueueState>,
    this: Weak<Self>,
}

impl fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutboundQueue")
            .field("id", &self.id)
            .field("min_send_interval", &self.min_send_interval)
            .field("inbox", &state.inbox.len())
            .field("outbox", &state.outbox.len())
            .field("draining", &state.draining)
            .finish()
    }
}

impl OutboundQueue {
    /// Create an empty, unbound queue.
    pub fn new(min_send_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ConnectionId::new(),
            min_send_interval,
            state: Mutex::new(QueueState::default()),
            this: this.clone(),
        })
    }

    /// Minimum spacing between two sends.
    pub fn min_send_interval(&self) -> Duration {
        self.min_send_interval
    }

    /// Set the callback that inbound frames are dispatched to.
    pub fn set_inbound_handler(&self, handler: InboundHandler) {
        self.state.lock().inbound = Some(handler);
    }

    /// Bind the live connection and flush anything already queued.
    pub fn bind_transport(&self, transport: Arc<dyn Transport>) {
        debug!(queue = %self.id, connection_id = transport.id(), "queue bound");
        self.state.lock().transport = Some(transport);
        self.ensure_draining();
    }

    /// Unbind `connection_id` if it is the bound connection.
    pub fn unbind_transport(&self, connection_id: &str) -> bool {
        let mut state = self.state.lock();
        match &state.transport {
            Some(t) if t.id() == connection_id => {
                state.transport = None;
                true
            }
            _ => false,
        }
    }

    /// Buffer an inbound frame for dispatch.
    pub fn enqueue_incoming(&self, raw: String) {
        self.state.lock().inbox.push_back(raw);
        self.ensure_draining();
    }

    /// Buffer an outbound item.
    pub fn enqueue_outgoing(&self, item: Outgoing) {
        self.state.lock().outbox.push_back(item);
        self.ensure_draining();
    }

    /// Buffered inbound frames.
    pub fn pending_incoming(&self) -> usize {
        self.state.lock().inbox.len()
    }

    /// Buffered outbound items.
    pub fn pending_outgoing(&self) -> usize {
        self.state.lock().outbox.len()
    }

    /// Whether a drain task is running.
    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    /// Start a drain task unless one is already running.
    pub fn ensure_draining(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        // Callers may hold the session lock, so never drain on their stack.
        let _ = tokio::spawn(async move { this.drain() });
    }

    fn drain(&self) {
        loop {
            match self.next_step() {
                Step::Inbound(raw, Some(handler)) => handler(raw),
                Step::Inbound(_, None) => {
                    debug!(queue = %self.id, "no inbound handler, dropping frame");
                }
                Step::Outbound(item, transport) => self.dispatch(item, transport),
                Step::Idle => return,
            }
        }
    }

    /// Pick the next unit of work, clearing `draining` when there is none.
    fn next_step(&self) -> Step {
        let mut state = self.state.lock();
        if let Some(raw) = state.inbox.pop_front() {
            let handler = state.inbound.clone();
            return Step::Inbound(raw, handler);
        }
        if state.outbox.is_empty() {
            state.draining = false;
            return Step::Idle;
        }
        if let Some(last) = state.last_send {
            let elapsed = last.elapsed();
            if elapsed < self.min_send_interval {
                state.draining = false;
                if !state.wake_scheduled {
                    state.wake_scheduled = true;
                    self.schedule_wake(self.min_send_interval - elapsed);
                }
                return Step::Idle;
            }
        }
        match state.outbox.pop_front() {
            Some(item) => Step::Outbound(item, state.transport.clone()),
            None => {
                state.draining = false;
                Step::Idle
            }
        }
    }

    fn schedule_wake(&self, after: Duration) {
        let weak = self.this.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(queue) = weak.upgrade() {
                queue.state.lock().wake_scheduled = false;
                queue.ensure_draining();
            }
        });
    }

    fn dispatch(&self, item: Outgoing, transport: Option<Arc<dyn Transport>>) {
        let (frame, guard) = item.into_parts();
        if let Some(guard) = guard {
            if !guard.is_valid() {
                debug!(queue = %self.id, "conditional frame no longer valid, discarding");
                guard.reject();
                return;
            }
        }

        let Some(transport) = transport.filter(|t| t.is_open()) else {
            debug!(queue = %self.id, "no open connection, dropping outbound frame");
            return;
        };
        if let Err(err) = transport.send(frame) {
            warn!(queue = %self.id, error = %err, error_kind = err.kind(), "outbound send failed");
        }
        self.state.lock().last_send = Some(Instant::now());
    }
}

impl Transport for OutboundQueue {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
        self.enqueue_outgoing(Outgoing::Plain(frame));
        Ok(())
    }

    fn send_guarded(&self, frame: Arc<String>, guard: SendGuard) -> Result<(), TransportError> {
        self.enqueue_outgoing(Outgoing::Conditional(frame, guard));
        Ok(())
    }

    fn close(&self) {
        let transport = self.state.lock().transport.clone();
        if let Some(transport) = transport {
            transport.close();
        }
    }

    fn is_open(&self) -> bool {
        self.state
            .lock()
            .transport
            .as_ref()
            .is_some_and(|t| t.is_open())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::testing::RecordingTransport;

    /// Transport that timestamps each send.
    struct TimedTransport {
        sends: Mutex<Vec<(Instant, Arc<String>)>>,
    }

    impl TimedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sends: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for TimedTransport {
        fn id(&self) -> &str {
            "timed"
        }
        fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
            self.sends.lock().push((Instant::now(), frame));
            Ok(())
        }
        fn close(&self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn frame(s: &str) -> Arc<String> {
        Arc::new(s.to_owned())
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_spaced_by_min_interval() {
        let queue = OutboundQueue::new(Duration::from_millis(200));
        let transport = TimedTransport::new();
        queue.bind_transport(transport.clone());

        for i in 0..4 {
            queue.enqueue_outgoing(Outgoing::Plain(frame(&format!("m{i}"))));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let sends = transport.sends.lock().clone();
        assert_eq!(sends.len(), 4);
        let order: Vec<&str> = sends.iter().map(|(_, f)| f.as_str()).collect();
        assert_eq!(order, vec!["m0", "m1", "m2", "m3"]);
        for pair in sends.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(200));
        }
        assert!(!queue.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_drains_before_next_outbound_send() {
        let queue = OutboundQueue::new(Duration::from_millis(200));
        let transport = TimedTransport::new();
        queue.bind_transport(transport.clone());

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        queue.set_inbound_handler(Arc::new(move |raw: String| {
            sink.lock().push(format!("in:{raw}"));
        }));

        queue.enqueue_outgoing(Outgoing::Plain(frame("first")));
        queue.enqueue_outgoing(Outgoing::Plain(frame("second")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.sends.lock().len(), 1);

        for i in 0..10 {
            queue.enqueue_incoming(i.to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.lock().len(), 10, "inbound is not rate limited");
        assert_eq!(transport.sends.lock().len(), 1, "outbound still throttled");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.sends.lock().len(), 2);
        let expected: Vec<String> = (0..10).map(|i| format!("in:{i}")).collect();
        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_conditional_is_discarded_without_consuming_slot() {
        let queue = OutboundQueue::new(Duration::from_millis(200));
        let transport = TimedTransport::new();
        queue.bind_transport(transport.clone());

        let rejected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&rejected);
        queue.enqueue_outgoing(Outgoing::Conditional(
            frame("stale"),
            SendGuard::new(|| false).on_invalid(move || flag.store(true, Ordering::SeqCst)),
        ));
        queue.enqueue_outgoing(Outgoing::Plain(frame("fresh")));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(rejected.load(Ordering::SeqCst));
        let sends = transport.sends.lock().clone();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1.as_str(), "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn guard_is_evaluated_at_dispatch_time() {
        let queue = OutboundQueue::new(Duration::from_millis(200));
        let transport = TimedTransport::new();
        queue.bind_transport(transport.clone());

        let valid = Arc::new(AtomicBool::new(true));
        let check = Arc::clone(&valid);
        queue.enqueue_outgoing(Outgoing::Plain(frame("a")));
        queue.enqueue_outgoing(Outgoing::Conditional(
            frame("b"),
            SendGuard::new(move || check.load(Ordering::SeqCst)),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        valid.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let sends = transport.sends.lock().clone();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1.as_str(), "a");
    }

    #[tokio::test]
    async fn unbound_queue_drops_outbound() {
        let queue = OutboundQueue::new(Duration::ZERO);
        assert!(!queue.is_open());
        queue.send(frame("lost")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.pending_outgoing(), 0);
    }

    #[tokio::test]
    async fn unbind_only_matches_bound_id() {
        let queue = OutboundQueue::new(Duration::ZERO);
        let transport = RecordingTransport::new("conn-9");
        queue.bind_transport(transport.clone());
        assert!(queue.is_open());
        assert!(!queue.unbind_transport("conn-1"));
        assert!(queue.unbind_transport("conn-9"));
        assert!(!queue.is_open());
    }

    #[tokio::test]
    async fn close_delegates_to_bound_transport() {
        let queue = OutboundQueue::new(Duration::ZERO);
        let transport = RecordingTransport::new("conn-3");
        queue.bind_transport(transport.clone());
        queue.close();
        assert!(transport.closed());
        assert!(!queue.is_open());
    }
}
