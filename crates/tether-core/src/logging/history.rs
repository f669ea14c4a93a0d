//! Bounded in-memory history of recent log events.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// One retained log event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Epoch milliseconds when the event was recorded.
    pub timestamp: i64,
    /// Level name (`INFO`, `WARN`, …).
    pub level: String,
    /// Module target.
    pub target: String,
    /// Message followed by `key=value` fields.
    pub message: String,
}

/// Shared ring buffer of the most recent log events.
///
/// Cloning yields another handle onto the same buffer.
#[derive(Clone, Debug)]
pub struct RecentLogs {
    inner: Arc<Mutex<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl RecentLogs {
    /// Create an empty history holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Maximum number of retained records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&self, record: LogRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut buf = self.inner.lock();
        while buf.len() >= self.capacity {
            let _ = buf.pop_front();
        }
        buf.push_back(record);
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing has been retained yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// A tracing layer feeding this history.
    pub fn layer(&self) -> HistoryLayer {
        HistoryLayer {
            logs: self.clone(),
        }
    }
}

/// Tracing layer that appends every event to a [`RecentLogs`] buffer.
pub struct HistoryLayer {
    logs: RecentLogs,
}

impl<S: Subscriber> Layer<S> for HistoryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        self.logs.push(LogRecord {
            timestamp: chrono::Utc::now().timestamp_millis(),
            level: meta.level().to_string(),
            target: meta.target().to_owned(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: 0,
            level: "INFO".into(),
            target: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let logs = RecentLogs::new(2);
        logs.push(record("a"));
        logs.push(record("b"));
        logs.push(record("c"));
        let msgs: Vec<String> = logs.snapshot().into_iter().map(|r| r.message).collect();
        assert_eq!(msgs, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let logs = RecentLogs::new(0);
        logs.push(record("a"));
        assert!(logs.is_empty());
    }

    #[test]
    fn layer_captures_message_and_fields() {
        let logs = RecentLogs::new(10);
        let subscriber = tracing_subscriber::registry().with(logs.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(session_key = "p1", sequence_id = 3_u64, "request timed out");
        });

        let records = logs.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, "WARN");
        assert!(records[0].message.starts_with("request timed out"));
        assert!(records[0].message.contains("session_key=p1"));
        assert!(records[0].message.contains("sequence_id=3"));
    }

    #[test]
    fn clones_share_buffer() {
        let logs = RecentLogs::new(4);
        let other = logs.clone();
        other.push(record("shared"));
        assert_eq!(logs.len(), 1);
    }
}
