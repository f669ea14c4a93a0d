//! Wire envelope and its JSON codec.
//!
//! Every frame on the connection is one JSON object:
//!
//! ```text
//! { "type": string, "timestamp": number, "sequenceId": number, "data": any, "responseId"?: number }
//! ```
//!
//! `responseId` is only present on replies and always refers to a
//! `sequenceId` the *receiver* previously sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{PING_TYPE, RESPONSE_SUFFIX};
use crate::errors::ProtocolError;

/// One protocol-level message unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Discriminator selecting a handler.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sender-side creation time in epoch milliseconds. Informational only.
    #[serde(default)]
    pub timestamp: i64,
    /// Per-session sender sequence number, starting at 0.
    pub sequence_id: u64,
    /// Application payload.
    #[serde(default)]
    pub data: Value,
    /// Sequence id of the envelope this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<u64>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(message_type: impl Into<String>, sequence_id: u64, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            sequence_id,
            data,
            response_id: None,
        }
    }

    /// Build a reply to the envelope with sequence id `answering`.
    ///
    /// `request_type` is the type of the inbound message; the reply carries
    /// `"<request_type>-response"`.
    pub fn reply(request_type: &str, sequence_id: u64, answering: u64, data: Value) -> Self {
        Self {
            response_id: Some(answering),
            ..Self::new(response_type(request_type), sequence_id, data)
        }
    }

    /// Whether this envelope answers a previous request.
    pub fn is_response(&self) -> bool {
        self.response_id.is_some()
    }
}

/// Serialize an envelope to its wire form.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

/// Parse a wire frame into an envelope.
///
/// Fails with [`ProtocolError::MalformedEnvelope`] when the frame is not a
/// JSON object or lacks `type` / `sequenceId`.
pub fn decode(raw: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

/// Reply type for a message type.
pub fn response_type(message_type: &str) -> String {
    format!("{message_type}{RESPONSE_SUFFIX}")
}

/// Whether applications are forbidden from registering a handler for this type.
pub fn is_reserved_type(message_type: &str) -> bool {
    message_type == PING_TYPE || message_type.ends_with(RESPONSE_SUFFIX)
}
