//! Error taxonomy for the session protocol.
//!
//! Decode and dispatch failures are contained inside the session (logged and
//! dropped). Only request failures and transport errors reach application
//! code, through `request()` and `open()` respectively.

use thiserror::Error;

/// Failure of the underlying connection.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    Closed,
    /// The outbound buffer is full; the frame was dropped.
    #[error("outbound buffer full")]
    BufferFull,
    /// No live connection is bound.
    #[error("no connection bound")]
    NotBound,
    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

impl TransportError {
    /// Machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::BufferFull => "buffer_full",
            Self::NotBound => "not_bound",
            Self::Connect(_) => "connect",
        }
    }
}

/// Protocol-level error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No handler is registered for an inbound message type.
    #[error("no handler registered for message type '{0}'")]
    UnhandledType(String),

    /// A reply matched no pending request (already timed out, or never sent).
    #[error("response {0} matches no pending request")]
    OrphanResponse(u64),

    /// A request got no reply within its window.
    #[error("request {sequence_id} ('{message_type}') timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Sequence id of the unanswered request.
        sequence_id: u64,
        /// Type of the unanswered request.
        message_type: String,
        /// Window that elapsed.
        timeout_ms: u64,
    },

    /// A pending request was rejected before a reply or timeout.
    #[error("request {0} was cancelled before a response arrived")]
    RequestCancelled(u64),

    /// No heartbeat arrived within the liveness window.
    #[error("no ping received for {0}ms")]
    LivenessTimeout(u64),

    /// Applications may not register handlers for reserved types.
    #[error("'{0}' is a reserved message type")]
    ReservedType(String),

    /// Underlying connection error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnhandledType(_) => "unhandled_type",
            Self::OrphanResponse(_) => "orphan_response",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::RequestCancelled(_) => "request_cancelled",
            Self::LivenessTimeout(_) => "liveness_timeout",
            Self::ReservedType(_) => "reserved_type",
            Self::Transport(_) => "transport",
        }
    }

    /// Whether this error is surfaced to application code rather than
    /// contained inside the session.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::RequestCancelled(_)
                | Self::ReservedType(_)
                | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_timeout_display() {
        let err = ProtocolError::RequestTimeout {
            sequence_id: 4,
            message_type: "map".into(),
            timeout_ms: 2000,
        };
        assert_eq!(err.to_string(), "request 4 ('map') timed out after 2000ms");
        assert_eq!(err.kind(), "request_timeout");
        assert!(err.is_surfaced());
    }

    #[test]
    fn transport_error_converts() {
        let err: ProtocolError = TransportError::Connect("refused".into()).into();
        assert!(matches!(err, ProtocolError::Transport(TransportError::Connect(_))));
        assert_eq!(err.to_string(), "connect failed: refused");
    }

    #[test]
    fn contained_errors_are_not_surfaced() {
        assert!(!ProtocolError::MalformedEnvelope("x".into()).is_surfaced());
        assert!(!ProtocolError::UnhandledType("x".into()).is_surfaced());
        assert!(!ProtocolError::OrphanResponse(1).is_surfaced());
        assert!(!ProtocolError::LivenessTimeout(10_000).is_surfaced());
    }

    #[test]
    fn transport_kinds() {
        assert_eq!(TransportError::Closed.kind(), "closed");
        assert_eq!(TransportError::BufferFull.kind(), "buffer_full");
        assert_eq!(TransportError::NotBound.kind(), "not_bound");
    }
}
