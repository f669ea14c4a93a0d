//! Ping emission and liveness monitoring.
//!
//! While a session is connected it owns exactly one repeating ping timer
//! and one single-shot liveness timer. Every arming cancels the previous
//! timer of the same kind. Each liveness arming also bumps a generation
//! counter, and a firing timer whose generation is stale does nothing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::json;
use tether_core::constants::PING_TYPE;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Timer handles owned by a session's state.
#[derive(Debug, Default)]
pub struct HeartbeatTimers {
    ping: Option<CancellationToken>,
    liveness: Option<CancellationToken>,
    liveness_generation: u64,
}

impl HeartbeatTimers {
    /// Cancel both timers.
    pub fn cancel_all(&mut self) {
        if let Some(token) = self.ping.take() {
            token.cancel();
        }
        self.cancel_liveness();
    }

    fn cancel_liveness(&mut self) {
        if let Some(token) = self.liveness.take() {
            token.cancel();
        }
        self.liveness_generation += 1;
    }

    /// Whether a ping timer is armed.
    pub fn ping_armed(&self) -> bool {
        self.ping.is_some()
    }

    /// Whether a liveness timer is armed.
    pub fn liveness_armed(&self) -> bool {
        self.liveness.is_some()
    }

    /// Consume the liveness timer if `generation` is still current.
    pub(crate) fn take_expired(&mut self, generation: u64) -> bool {
        if self.liveness_generation != generation || self.liveness.is_none() {
            return false;
        }
        self.liveness = None;
        true
    }

    /// Start the repeating ping timer, replacing any previous one.
    pub(crate) fn arm_ping(&mut self, session: &Arc<Session>, period: Duration) {
        if let Some(token) = self.ping.take() {
            token.cancel();
        }
        let cancel = CancellationToken::new();
        self.ping = Some(cancel.clone());
        let _ = tokio::spawn(run_ping_loop(Arc::downgrade(session), period, cancel));
    }

    /// Start the liveness timer, replacing any previous one.
    pub(crate) fn arm_liveness(&mut self, session: &Arc<Session>, timeout: Duration) {
        self.cancel_liveness();
        let cancel = CancellationToken::new();
        self.liveness = Some(cancel.clone());
        let generation = self.liveness_generation;
        let _ = tokio::spawn(run_liveness_timer(
            Arc::downgrade(session),
            timeout,
            generation,
            cancel,
        ));
    }
}

/// Send `ping {}` every `period`, first after one full period.
async fn run_ping_loop(session: Weak<Session>, period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let _ = session.send(PING_TYPE, json!({}));
            }
            () = cancel.cancelled() => return,
        }
    }
}

async fn run_liveness_timer(
    session: Weak<Session>,
    timeout: Duration,
    generation: u64,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = time::sleep(timeout) => {
            if let Some(session) = session.upgrade() {
                session.liveness_expired(generation);
            }
        }
        () = cancel.cancelled() => {}
    }
}
