//! Message store: the ordered collection the rendering layer observes.

use crate::client::merge::{self, MergeOutcome, PendingEcho};
use crate::error::{ChatError, Result};
use crate::types::{InboundMessage, Message};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pending echoes older than this no longer suppress anything.
pub const PENDING_ECHO_TTL: Duration = Duration::from_secs(60);

const EVENT_CAPACITY: usize = 256;

/// Append-ordered messages plus the ledger of sends awaiting their hub echo.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    pending_echoes: VecDeque<PendingEcho>,
    live: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Id the next appended message receives.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.messages.len() as u64 + 1
    }

    /// Whether anything has been appended since the store was created.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Replace the whole content. Used once, by the history loader, and
    /// refused once a live or local message has been appended.
    pub fn seed(&mut self, messages: Vec<Message>) -> Result<()> {
        if self.live {
            return Err(ChatError::SeedAfterLive);
        }
        self.messages = messages;
        Ok(())
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.live = true;
        self.messages.push(message);
    }

    pub fn register_pending_echo(&mut self, echo: PendingEcho) {
        self.prune_pending_echoes(echo.registered_at);
        self.pending_echoes.push_back(echo);
    }

    fn prune_pending_echoes(&mut self, now: Instant) {
        self.pending_echoes
            .retain(|p| now.saturating_duration_since(p.registered_at) < PENDING_ECHO_TTL);
    }

    /// Forget a pending echo, e.g. because the live send failed.
    pub fn cancel_pending_echo(&mut self, correlation_id: Uuid) -> bool {
        let before = self.pending_echoes.len();
        self.pending_echoes
            .retain(|p| p.correlation_id != correlation_id);
        before != self.pending_echoes.len()
    }

    #[inline]
    pub fn pending_echo_count(&self) -> usize {
        self.pending_echoes.len()
    }

    /// Remove and return the oldest live pending echo matching `author` and `body`.
    pub(crate) fn take_pending_echo(&mut self, author: &str, body: &str, now: Instant) -> Option<PendingEcho> {
        self.prune_pending_echoes(now);
        let pos = self
            .pending_echoes
            .iter()
            .position(|p| p.author == author && p.body == body)?;
        self.pending_echoes.remove(pos)
    }
}

/// Change notification for store subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// History replaced the content; read a fresh snapshot.
    Seeded { count: usize },
    Appended(Message),
    /// The subscriber fell behind and missed events; read a fresh snapshot.
    Lagged { missed: u64 },
}

/// Shared, subscribable handle to the message store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<MessageStore>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreHandle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        StoreHandle {
            inner: Arc::new(RwLock::new(MessageStore::new())),
            events,
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.read().messages().to_vec()
    }

    /// Read the messages without cloning them.
    pub fn with_messages<R>(&self, f: impl FnOnce(&[Message]) -> R) -> R {
        f(self.inner.read().messages())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn seed(&self, messages: Vec<Message>) -> Result<()> {
        let mut store = self.inner.write();
        let count = messages.len();
        store.seed(messages)?;
        tracing::debug!("[ChatStore] Seeded with {} messages", count);
        self.notify(StoreEvent::Seeded { count });
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.inner.read().is_live()
    }

    /// Run an inbound live message through the merge policy.
    pub fn merge_inbound(&self, incoming: InboundMessage, received_at: DateTime<Local>) -> MergeOutcome {
        let mut store = self.inner.write();
        let outcome = merge::merge(&mut store, incoming, received_at, Instant::now());
        if let MergeOutcome::Appended(message) = &outcome {
            self.notify(StoreEvent::Appended(message.clone()));
        }
        outcome
    }

    /// Append the sender's own message after a successful send.
    pub fn append_local_echo(
        &self,
        author: &str,
        body: &str,
        timestamp: &str,
        correlation_id: Uuid,
    ) -> Message {
        let mut store = self.inner.write();
        let message = merge::append_local_echo(&mut store, author, body, timestamp, correlation_id);
        self.notify(StoreEvent::Appended(message.clone()));
        message
    }

    pub fn next_id(&self) -> u64 {
        self.inner.read().next_id()
    }

    pub fn register_pending_echo(&self, echo: PendingEcho) {
        self.inner.write().register_pending_echo(echo);
    }

    pub fn cancel_pending_echo(&self, correlation_id: Uuid) -> bool {
        self.inner.write().cancel_pending_echo(correlation_id)
    }

    pub fn pending_echo_count(&self) -> usize {
        self.inner.read().pending_echo_count()
    }

    pub fn subscribe(&self) -> StoreSubscription {
        StoreSubscription {
            receiver: self.events.subscribe(),
        }
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn notify(&self, event: StoreEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("[ChatStore] No subscribers for store event");
        }
    }
}

/// A live view of store changes. Dropping it, or calling
/// [`StoreSubscription::cancel`], ends delivery.
pub struct StoreSubscription {
    receiver: broadcast::Receiver<StoreEvent>,
}

impl StoreSubscription {
    /// Next change, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("[ChatStore] Subscriber lagged, {} events missed", missed);
                Some(StoreEvent::Lagged { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(StoreEvent::Lagged { missed }),
            Err(_) => None,
        }
    }

    pub fn cancel(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_replaces_content() {
        let mut store = MessageStore::new();
        store
            .seed(vec![Message::new(1, "x", "stale", "")])
            .unwrap();
        store
            .seed(vec![
                Message::new(1, "bob", "hello", "10:00:00"),
                Message::new(2, "amy", "hi", "10:00:05"),
            ])
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].body, "hello");
        assert_eq!(store.next_id(), 3);
        assert!(!store.is_live());
    }

    #[test]
    fn test_seed_refused_after_append() {
        let handle = StoreHandle::new();
        handle.merge_inbound(InboundMessage::new("carol", "hey"), Local::now());
        assert!(handle.is_live());

        let err = handle
            .seed(vec![Message::new(1, "bob", "hello", "10:00:00")])
            .unwrap_err();
        assert!(matches!(err, ChatError::SeedAfterLive));
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.snapshot()[0].body, "hey");
    }

    #[test]
    fn test_register_prunes_expired_echoes() {
        let mut store = MessageStore::new();
        let start = Instant::now();
        for i in 0..5 {
            store.register_pending_echo(PendingEcho {
                registered_at: start,
                ..PendingEcho::new("alice", format!("m{}", i))
            });
        }
        assert_eq!(store.pending_echo_count(), 5);

        store.register_pending_echo(PendingEcho {
            registered_at: start + PENDING_ECHO_TTL + Duration::from_secs(1),
            ..PendingEcho::new("alice", "later")
        });
        assert_eq!(store.pending_echo_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_sees_appends_in_order() {
        let handle = StoreHandle::new();
        let mut sub = handle.subscribe();

        handle
            .seed(vec![Message::new(1, "bob", "hello", "10:00:00")])
            .unwrap();
        handle.merge_inbound(InboundMessage::new("carol", "hey"), Local::now());

        assert_eq!(sub.recv().await, Some(StoreEvent::Seeded { count: 1 }));
        match sub.recv().await {
            Some(StoreEvent::Appended(msg)) => {
                assert_eq!(msg.id, 2);
                assert_eq!(msg.author, "carol");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_subscription_detaches() {
        let handle = StoreHandle::new();
        let sub = handle.subscribe();
        assert_eq!(handle.subscriber_count(), 1);
        sub.cancel();
        assert_eq!(handle.subscriber_count(), 0);
    }

    #[test]
    fn test_lagged_subscriber_is_told() {
        let handle = StoreHandle::new();
        let mut sub = handle.subscribe();
        for i in 0..(EVENT_CAPACITY + 10) {
            handle.merge_inbound(InboundMessage::new("bot", format!("m{}", i)), Local::now());
        }
        assert!(matches!(sub.try_recv(), Some(StoreEvent::Lagged { .. })));
        assert_eq!(handle.len(), EVENT_CAPACITY + 10);
    }
}
