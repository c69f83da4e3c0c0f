//! Client-side chat synchronization.
//!
//! A [`ChatSession`] seeds its message store from durable history and then
//! keeps a live hub channel open, reconnecting when it drops. Outbound
//! messages go over the live channel and to durable storage.

pub mod client;
pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use client::{ChatSession, ClientConfig};
pub use error::{ChatError, Result};
pub use types::{ConnectionState, Message, SessionIdentity};
