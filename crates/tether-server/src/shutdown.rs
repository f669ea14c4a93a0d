//! Server-wide stop signal.
//!
//! One token is shared by the HTTP listener and every socket task. Once it
//! fires, sockets stop reading, detach their sessions and flush a Close
//! frame; [`ShutdownCoordinator::stop`] then gives the listener a grace
//! period before aborting it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owner of the stop token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Token observed by the listener and each socket.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Fire the token, then wait up to `grace` for `tasks`. Returns how many
    /// had to be aborted.
    pub async fn stop(&self, tasks: Vec<JoinHandle<()>>, grace: Duration) -> usize {
        self.shutdown();
        info!(tasks = tasks.len(), ?grace, "stopping server");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_ok()
        {
            return 0;
        }
        let stragglers = aborts.iter().filter(|a| !a.is_finished()).count();
        warn!(stragglers, "grace period elapsed, aborting");
        for abort in aborts {
            abort.abort();
        }
        stragglers
    }
}
