//! Streaming parser for hub frames.
//!
//! Socket messages may carry several frames, or a frame may be split across
//! messages; the parser buffers bytes until a record separator arrives.

use crate::error::{ChatError, Result};
use crate::protocol::constants::{message_types, methods, RECORD_SEPARATOR};
use crate::types::InboundMessage;
use bytes::BytesMut;
use serde::Deserialize;
use serde_json::Value;

/// A decoded frame from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Reply to the client handshake. `error` set means the hub refused it.
    Handshake { error: Option<String> },
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// A frame type this client does not act on.
    Ignored(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<u8>,
    invocation_id: Option<String>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingHandshake,
    Streaming,
}

#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
    state: ParseState,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            buffer: BytesMut::with_capacity(4096),
            state: ParseState::AwaitingHandshake,
        }
    }

    #[inline]
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Buffer `data` and return every complete frame it finishes.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<HubFrame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == RECORD_SEPARATOR) {
            let record = self.buffer.split_to(pos + 1);
            let payload = &record[..pos];
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let raw: RawFrame = serde_json::from_slice(payload)
                .map_err(|e| ChatError::Protocol(format!("malformed hub frame: {}", e)))?;

            let frame = match self.state {
                ParseState::AwaitingHandshake => {
                    self.state = ParseState::Streaming;
                    HubFrame::Handshake { error: raw.error }
                }
                ParseState::Streaming => decode(raw)?,
            };
            frames.push(frame);
        }

        Ok(frames)
    }

    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn decode(raw: RawFrame) -> Result<HubFrame> {
    let kind = raw
        .kind
        .ok_or_else(|| ChatError::Protocol("hub frame without type".to_string()))?;

    let frame = match kind {
        message_types::INVOCATION => HubFrame::Invocation {
            invocation_id: raw.invocation_id,
            target: raw
                .target
                .ok_or_else(|| ChatError::Protocol("invocation without target".to_string()))?,
            arguments: raw.arguments,
        },
        message_types::COMPLETION => HubFrame::Completion {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| ChatError::Protocol("completion without invocationId".to_string()))?,
            result: raw.result,
            error: raw.error,
        },
        message_types::PING => HubFrame::Ping,
        message_types::CLOSE => HubFrame::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubFrame::Ignored(other),
    };
    Ok(frame)
}

/// Extract a chat message from a `ReceiveMessage(user, message)` invocation.
///
/// Returns `None` for other targets.
pub fn inbound_from_invocation(target: &str, arguments: &[Value]) -> Option<Result<InboundMessage>> {
    if !target.eq_ignore_ascii_case(methods::RECEIVE_MESSAGE) {
        return None;
    }
    let user = arguments.first().and_then(Value::as_str);
    let message = arguments.get(1).and_then(Value::as_str);
    Some(match (user, message) {
        (Some(user), Some(message)) => Ok(InboundMessage::new(user, message)),
        _ => Err(ChatError::Protocol(format!(
            "{} expects two string arguments, got {}",
            methods::RECEIVE_MESSAGE,
            Value::Array(arguments.to_vec())
        ))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handshaken() -> FrameParser {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"{}\x1e").unwrap();
        assert_eq!(frames, vec![HubFrame::Handshake { error: None }]);
        parser
    }

    #[test]
    fn test_handshake_error() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"{\"error\":\"unsupported\"}\x1e").unwrap();
        assert_eq!(
            frames,
            vec![HubFrame::Handshake {
                error: Some("unsupported".to_string())
            }]
        );
        assert_eq!(parser.state(), ParseState::Streaming);
    }

    #[test]
    fn test_handshake_and_frame_in_one_message() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"{}\x1e{\"type\":6}\x1e").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], HubFrame::Ping);
    }

    #[test]
    fn test_split_frame() {
        let mut parser = handshaken();
        let first = parser
            .feed(b"{\"type\":1,\"target\":\"ReceiveMessage\",")
            .unwrap();
        assert!(first.is_empty());
        assert!(parser.pending_bytes() > 0);

        let frames = parser.feed(b"\"arguments\":[\"carol\",\"hey\"]}\x1e").unwrap();
        assert_eq!(
            frames,
            vec![HubFrame::Invocation {
                invocation_id: None,
                target: "ReceiveMessage".to_string(),
                arguments: vec![json!("carol"), json!("hey")],
            }]
        );
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn test_completion_and_close() {
        let mut parser = handshaken();
        let frames = parser
            .feed(b"{\"type\":3,\"invocationId\":\"1\",\"error\":\"nope\"}\x1e{\"type\":7,\"allowReconnect\":true}\x1e")
            .unwrap();
        assert_eq!(
            frames,
            vec![
                HubFrame::Completion {
                    invocation_id: "1".to_string(),
                    result: None,
                    error: Some("nope".to_string()),
                },
                HubFrame::Close {
                    error: None,
                    allow_reconnect: true,
                },
            ]
        );
    }

    #[test]
    fn test_unknown_type_ignored() {
        let mut parser = handshaken();
        let frames = parser.feed(b"{\"type\":2,\"invocationId\":\"4\"}\x1e").unwrap();
        assert_eq!(frames, vec![HubFrame::Ignored(2)]);
    }

    #[test]
    fn test_malformed_frame() {
        let mut parser = handshaken();
        assert!(matches!(
            parser.feed(b"not json\x1e"),
            Err(ChatError::Protocol(_))
        ));
    }

    #[test]
    fn test_inbound_from_invocation() {
        let msg = inbound_from_invocation("ReceiveMessage", &[json!("carol"), json!("hey")])
            .unwrap()
            .unwrap();
        assert_eq!(msg, InboundMessage::new("carol", "hey"));

        assert!(inbound_from_invocation("UserJoined", &[json!("x")]).is_none());
        assert!(inbound_from_invocation("ReceiveMessage", &[json!(1)])
            .unwrap()
            .is_err());
    }
}
