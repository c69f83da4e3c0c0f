//! Hub frame formatter.
//!
//! Builds the text frames the client writes to the hub socket. Each returned
//! string already carries the trailing record separator.

use crate::protocol::constants::{message_types, PROTOCOL_NAME, PROTOCOL_VERSION, RECORD_SEPARATOR};
use serde_json::{json, Value};

/// Handshake request, the first frame on every new socket.
pub fn format_handshake() -> String {
    terminate(json!({ "protocol": PROTOCOL_NAME, "version": PROTOCOL_VERSION }))
}

/// Invocation of a hub method.
///
/// With `invocation_id` the server answers with a completion frame; without
/// one the call is fire-and-forget.
pub fn format_invocation(
    invocation_id: Option<&str>,
    target: &str,
    arguments: &[Value],
) -> String {
    let mut frame = json!({
        "type": message_types::INVOCATION,
        "target": target,
        "arguments": arguments,
    });
    if let (Some(id), Some(obj)) = (invocation_id, frame.as_object_mut()) {
        obj.insert("invocationId".to_string(), Value::String(id.to_string()));
    }
    terminate(frame)
}

pub fn format_ping() -> String {
    terminate(json!({ "type": message_types::PING }))
}

pub fn format_close(error: Option<&str>) -> String {
    match error {
        Some(e) => terminate(json!({ "type": message_types::CLOSE, "error": e })),
        None => terminate(json!({ "type": message_types::CLOSE })),
    }
}

fn terminate(frame: Value) -> String {
    let mut text = frame.to_string();
    text.push(RECORD_SEPARATOR as char);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(frame: &str) -> Value {
        assert!(frame.ends_with('\u{1e}'));
        serde_json::from_str(frame.trim_end_matches('\u{1e}')).unwrap()
    }

    #[test]
    fn test_format_handshake() {
        let value = strip(&format_handshake());
        assert_eq!(value, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn test_format_invocation_with_id() {
        let frame = format_invocation(Some("7"), "SendMessage", &[json!("alice"), json!("hi")]);
        let value = strip(&frame);
        assert_eq!(value["type"], 1);
        assert_eq!(value["target"], "SendMessage");
        assert_eq!(value["invocationId"], "7");
        assert_eq!(value["arguments"], json!(["alice", "hi"]));
    }

    #[test]
    fn test_format_invocation_without_id() {
        let value = strip(&format_invocation(None, "SendMessage", &[]));
        assert!(value.get("invocationId").is_none());
    }

    #[test]
    fn test_ping_and_close() {
        assert_eq!(strip(&format_ping()), json!({"type": 6}));
        assert_eq!(strip(&format_close(None)), json!({"type": 7}));
        assert_eq!(strip(&format_close(Some("bye")))["error"], "bye");
    }
}
