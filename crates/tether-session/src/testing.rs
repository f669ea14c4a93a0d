//! Test doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::envelope::{Envelope, decode};
use tether_core::errors::TransportError;

use crate::connection::Transport;

/// Transport that records every frame it is handed.
pub(crate) struct RecordingTransport {
    id: String,
    frames: Mutex<Vec<Arc<String>>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn frames(&self) -> Vec<Arc<String>> {
        self.frames.lock().clone()
    }

    pub(crate) fn envelopes(&self) -> Vec<Envelope> {
        self.frames()
            .iter()
            .map(|f| decode(f).expect("recorded frame decodes"))
            .collect()
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Poll until a frame of `message_type` has been sent.
    pub(crate) async fn wait_for_type(&self, message_type: &str) -> Envelope {
        for _ in 0..1_000 {
            if let Some(env) = self
                .envelopes()
                .into_iter()
                .find(|e| e.message_type == message_type)
            {
                return env;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("no '{message_type}' frame was sent");
    }
}

impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, frame: Arc<String>) -> Result<(), TransportError> {
        if self.closed() {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed()
    }
}
