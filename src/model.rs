//! Core data types for the event queue.
//!
//! This module defines the fundamental data structures used throughout the
//! queue API: offsets and the records stored in topic logs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sequence number of a record within its topic.
///
/// Offsets are assigned at append time, start at 0, and form a contiguous
/// range within each topic. A topic's *next offset* is the offset its next
/// successful append will receive, which is also the count of committed
/// records.
pub type Offset = u64;

/// A record stored in a topic log.
///
/// Records are the unit of data in the queue. Each record carries the topic
/// it belongs to, the offset it was assigned, and an opaque payload.
///
/// # Payloads
///
/// Payloads are byte strings; the queue does not interpret or validate their
/// contents. The JSON surfaces (HTTP and WebSocket) render payloads as UTF-8
/// text, so clients speaking JSON should produce UTF-8 payloads.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use eventlog::Record;
///
/// let record = Record {
///     offset: 0,
///     topic: "orders".to_string(),
///     payload: Bytes::from(r#"{"id": "123", "amount": 99.99}"#),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The offset assigned to this record within its topic.
    pub offset: Offset,

    /// The topic this record belongs to.
    pub topic: String,

    /// The record payload.
    #[serde(with = "payload_text")]
    pub payload: Bytes,
}

impl Record {
    /// Creates a new record.
    pub fn new(offset: Offset, topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// JSON representation of payloads as text.
///
/// The wire-facing JSON protocols carry payloads as plain strings, matching
/// the HTTP produce body and the WebSocket `message_payload` field. Non-UTF-8
/// bytes are replaced on the way out.
mod payload_text {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        String::deserialize(deserializer).map(Bytes::from)
    }
}
