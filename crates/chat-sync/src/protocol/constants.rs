//! Protocol constants for the chat hub.
//!
//! The live channel speaks the JSON hub protocol: every frame is a JSON
//! object terminated by the ASCII record separator.
//!
//! | Type | Constant | Direction |
//! |------|----------|-----------|
//! | 1 | `message_types::INVOCATION` | both |
//! | 3 | `message_types::COMPLETION` | server to client |
//! | 6 | `message_types::PING` | both |
//! | 7 | `message_types::CLOSE` | both |

/// Terminates every frame on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Hub sub-protocol announced in the handshake.
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

/// Query value sent to the negotiate endpoint.
pub const NEGOTIATE_VERSION: u32 = 1;

/// Default endpoint paths, relative to the server base URL.
pub const DEFAULT_HISTORY_PATH: &str = "/Chat";
pub const DEFAULT_HUB_PATH: &str = "/chathub";

pub mod message_types {
    pub const INVOCATION: u8 = 1;
    pub const STREAM_ITEM: u8 = 2;
    pub const COMPLETION: u8 = 3;
    pub const STREAM_INVOCATION: u8 = 4;
    pub const CANCEL_INVOCATION: u8 = 5;
    pub const PING: u8 = 6;
    pub const CLOSE: u8 = 7;
}

/// Hub method names.
pub mod methods {
    /// Client to server: `SendMessage(user, message)`.
    pub const SEND_MESSAGE: &str = "SendMessage";
    /// Server to client: `ReceiveMessage(user, message)`.
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
}

pub mod transports {
    pub const WEB_SOCKETS: &str = "WebSockets";
}
