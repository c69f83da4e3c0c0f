//! Inbound merge policy.
//!
//! An inbound message gets id = store length + 1 and the receive time unless
//! the sender supplied one, then it is appended. The only exception is the
//! hub echo of a message this client already appended locally: the dispatcher
//! registers a [`PendingEcho`] before invoking the live channel, and the first
//! inbound message with the same author and body consumes it instead of being
//! appended.

use crate::client::store::MessageStore;
use crate::types::{receive_stamp, InboundMessage, Message};
use chrono::{DateTime, Local};
use std::time::Instant;
use uuid::Uuid;

/// A locally sent message whose hub echo has not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEcho {
    pub correlation_id: Uuid,
    pub author: String,
    pub body: String,
    pub registered_at: Instant,
}

impl PendingEcho {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        PendingEcho {
            correlation_id: Uuid::new_v4(),
            author: author.into(),
            body: body.into(),
            registered_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Appended(Message),
    /// The message was the echo of an earlier local send.
    EchoSuppressed { correlation_id: Uuid },
}

impl MergeOutcome {
    #[inline]
    pub fn appended(&self) -> Option<&Message> {
        match self {
            MergeOutcome::Appended(m) => Some(m),
            MergeOutcome::EchoSuppressed { .. } => None,
        }
    }
}

pub fn merge(
    store: &mut MessageStore,
    incoming: InboundMessage,
    received_at: DateTime<Local>,
    now: Instant,
) -> MergeOutcome {
    if let Some(echo) = store.take_pending_echo(&incoming.author, &incoming.body, now) {
        tracing::debug!(
            "[ChatMerge] Suppressed hub echo of local message {}",
            echo.correlation_id
        );
        return MergeOutcome::EchoSuppressed {
            correlation_id: echo.correlation_id,
        };
    }

    let timestamp = incoming
        .timestamp
        .unwrap_or_else(|| receive_stamp(received_at));
    let message = Message::new(store.next_id(), incoming.author, incoming.body, timestamp);
    store.push(message.clone());
    MergeOutcome::Appended(message)
}

/// Append the sender's own message, tagged with its correlation id.
pub fn append_local_echo(
    store: &mut MessageStore,
    author: &str,
    body: &str,
    timestamp: &str,
    correlation_id: Uuid,
) -> Message {
    let message =
        Message::new(store.next_id(), author, body, timestamp).with_correlation_id(correlation_id);
    store.push(message.clone());
    message
}
