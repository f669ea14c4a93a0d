//! Serial execution of application handlers, off the inbound path.
//!
//! Replies and pings are resolved inline by the session; handler futures are
//! queued here and run one at a time in arrival order on a task of their
//! own. The socket reader and the outbound queue therefore keep moving
//! while a handler awaits, which is what lets a handler issue a request and
//! receive its reply.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tether_core::ids::SessionKey;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

/// Per-session FIFO of handler futures.
pub(crate) struct HandlerRunner {
    session_key: SessionKey,
    tx: mpsc::UnboundedSender<Job>,
    // Taken by the first `submit`, which starts the worker.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl HandlerRunner {
    pub(crate) fn new(session_key: SessionKey) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session_key,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue `job` behind every job submitted before it.
    pub(crate) fn submit(&self, job: Job) {
        if let Some(rx) = self.rx.lock().take() {
            let _ = tokio::spawn(run(self.session_key.clone(), rx));
        }
        if self.tx.send(job).is_err() {
            debug!(session_key = %self.session_key, "handler worker gone, dropping job");
        }
    }

    /// Resolves once every job submitted before this call has finished.
    pub(crate) async fn settled(&self) {
        let (done, finished) = oneshot::channel();
        self.submit(
            async move {
                let _ = done.send(());
            }
            .boxed(),
        );
        let _ = finished.await;
    }
}

async fn run(session_key: SessionKey, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!(session_key = %session_key, "message handler panicked");
        }
    }
    debug!(session_key = %session_key, "handler worker stopped");
}
