//! Pending-request table keyed by sequence id.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// Requests awaiting a reply.
///
/// Entries are removed on resolution, on timeout, and on cancellation, so
/// the table never outlives the requests it tracks.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl PendingRequests {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sequence_id` and return the receiver its reply arrives on.
    pub fn register(&self, sequence_id: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.lock().insert(sequence_id, tx);
        rx
    }

    /// Deliver a reply. Returns `false` if nothing was waiting on `sequence_id`.
    pub fn resolve(&self, sequence_id: u64, data: Value) -> bool {
        let Some(tx) = self.inner.lock().remove(&sequence_id) else {
            return false;
        };
        // The requester may have given up between timeout and removal.
        let _ = tx.send(data);
        true
    }

    /// Forget an entry without resolving it.
    pub fn remove(&self, sequence_id: u64) -> bool {
        self.inner.lock().remove(&sequence_id).is_some()
    }

    /// Drop every entry; waiting requesters observe cancellation.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        drained.len()
    }

    /// Whether `sequence_id` is still waiting.
    pub fn contains(&self, sequence_id: u64) -> bool {
        self.inner.lock().contains_key(&sequence_id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn resolve_delivers_and_removes() {
        let pending = PendingRequests::new();
        let rx = pending.register(3);
        assert!(pending.contains(3));
        assert!(pending.resolve(3, json!({"ok": true})));
        assert_eq!(rx.await.unwrap(), json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[test]
    fn resolve_unknown_is_false() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve(42, Value::Null));
    }

    #[test]
    fn resolve_zero_sequence_id() {
        let pending = PendingRequests::new();
        let _rx = pending.register(0);
        assert!(pending.resolve(0, Value::Null));
    }

    #[tokio::test]
    async fn cancel_all_drops_senders() {
        let pending = PendingRequests::new();
        let a = pending.register(1);
        let b = pending.register(2);
        assert_eq!(pending.cancel_all(), 2);
        assert!(a.await.is_err());
        assert!(b.await.is_err());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn remove_reports_presence() {
        let pending = PendingRequests::new();
        let _rx = pending.register(5);
        assert!(pending.remove(5));
        assert!(!pending.remove(5));
    }
}
