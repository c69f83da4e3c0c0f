use crate::error::Result;
use crate::types::{InboundMessage, Message, SessionIdentity};
use async_trait::async_trait;
use std::sync::Arc;

/// Abstraction for the durable-storage endpoint.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Full history, oldest first.
    async fn load_history(&self) -> Result<Vec<Message>>;
    async fn persist(&self, message: &Message) -> Result<()>;
}

/// Event delivered by an open live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Message(InboundMessage),
    /// Transport-level liveness signal; carries no chat content.
    KeepAlive,
    /// The server ended the connection.
    Closed { reason: Option<String> },
}

/// Outbound half of an open live channel.
#[async_trait]
pub trait LiveLink: Send + Sync + 'static {
    /// Invoke `SendMessage(user, message)` and wait for the hub to acknowledge it.
    async fn send_message(&self, user: &str, message: &str) -> Result<()>;
    /// Release the connection. Idempotent.
    async fn close(&self);
}

/// An open live channel. The event stream ending counts as a transport drop.
pub struct LiveChannel {
    pub link: Arc<dyn LiveLink>,
    pub events: async_channel::Receiver<Result<LiveEvent>>,
}

/// Abstraction for opening the live channel.
#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    async fn open(&self, session: &SessionIdentity) -> Result<LiveChannel>;
}
