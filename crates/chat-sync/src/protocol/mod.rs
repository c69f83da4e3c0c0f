//! Wire protocol of the live hub channel.

pub mod constants;
pub mod formatter;
pub mod negotiate;
pub mod parser;

pub use constants::*;
pub use formatter::*;
pub use negotiate::NegotiateResponse;
pub use parser::{inbound_from_invocation, FrameParser, HubFrame};
