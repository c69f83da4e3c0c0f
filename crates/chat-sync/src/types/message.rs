//! Chat message as stored, sent and received.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single chat message.
///
/// The serialized form is the storage row `{id, user, message, timestamp}`.
/// `timestamp` is kept as an opaque string: history rows carry whatever
/// format their writer used (sender RFC 3339 or receiver wall-clock time).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the local store, 1-based.
    pub id: u64,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(default)]
    pub timestamp: String,
    /// Set on local echoes; never leaves this client.
    #[serde(skip)]
    pub correlation_id: Option<Uuid>,
}

impl Message {
    pub fn new(
        id: u64,
        author: impl Into<String>,
        body: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Message {
            id,
            author: author.into(),
            body: body.into(),
            timestamp: timestamp.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_local_echo(&self) -> bool {
        self.correlation_id.is_some()
    }
}

/// A message as delivered by the live channel, before it has a local id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub author: String,
    pub body: String,
    /// Sender-assigned time, when the transport carries one.
    pub timestamp: Option<String>,
}

impl InboundMessage {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        InboundMessage {
            author: author.into(),
            body: body.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Receiver-clock stamp for inbound messages (`HH:MM:SS`, local time).
pub fn receive_stamp(at: DateTime<Local>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// Sender-clock stamp for outbound messages (RFC 3339, UTC, millisecond precision).
pub fn send_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new(1, "bob", "hello", "10:00:00");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 1, "user": "bob", "message": "hello", "timestamp": "10:00:00"})
        );
    }

    #[test]
    fn test_correlation_id_stays_local() {
        let msg = Message::new(2, "alice", "hi", "t").with_correlation_id(Uuid::new_v4());
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("correlation"));
        let back: Message = serde_json::from_str(&text).unwrap();
        assert!(!back.is_local_echo());
    }

    #[test]
    fn test_missing_body_deserializes_empty() {
        let msg: Message = serde_json::from_str(r#"{"id":3,"user":"x"}"#).unwrap();
        assert_eq!(msg.body, "");
        assert_eq!(msg.timestamp, "");
    }

    #[test]
    fn test_stamps() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap();
        assert_eq!(send_stamp(utc), "2024-05-01T09:30:15.000Z");

        let local = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(receive_stamp(local), "10:00:00");
    }
}
