//! In-memory storage and hub used by the session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chat_sync::client::StoreEvent;
use chat_sync::error::{ChatError, Result};
use chat_sync::traits::{HistoryStore, LiveChannel, LiveEvent, LiveLink, LiveTransport};
use chat_sync::types::{InboundMessage, Message, SessionIdentity};
use chat_sync::client::StoreSubscription;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStorage {
    pub rows: Mutex<Vec<Message>>,
    pub fail_load: AtomicBool,
    pub fail_persist: AtomicBool,
    /// Milliseconds each history load takes.
    pub load_delay_ms: AtomicU64,
}

impl MemoryStorage {
    pub fn with_rows(rows: Vec<Message>) -> Arc<Self> {
        let storage = MemoryStorage::default();
        *storage.rows.lock() = rows;
        Arc::new(storage)
    }
}

#[async_trait]
impl HistoryStore for MemoryStorage {
    async fn load_history(&self) -> Result<Vec<Message>> {
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("storage responded 503".into()));
        }
        Ok(self.rows.lock().clone())
    }

    async fn persist(&self, message: &Message) -> Result<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("storage responded 500".into()));
        }
        self.rows.lock().push(message.clone());
        Ok(())
    }
}

/// A hub that broadcasts every `SendMessage` back to the current channel.
#[derive(Default)]
pub struct MemoryHub {
    pub opens: AtomicUsize,
    pub refuse: AtomicBool,
    pub fail_send: AtomicBool,
    /// Opens never complete.
    pub stall: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
    channels: Mutex<Vec<async_channel::Sender<Result<LiveEvent>>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryHub::default())
    }

    fn current(&self) -> Option<async_channel::Sender<Result<LiveEvent>>> {
        self.channels.lock().last().cloned()
    }

    /// Deliver a message from another participant.
    pub fn push(&self, author: &str, body: &str) {
        if let Some(tx) = self.current() {
            let _ = tx.try_send(Ok(LiveEvent::Message(InboundMessage::new(author, body))));
        }
    }

    /// Simulate the transport dropping.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.current() {
            tx.close();
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct MemoryLink {
    hub: Arc<MemoryHub>,
    tx: async_channel::Sender<Result<LiveEvent>>,
}

#[async_trait]
impl LiveLink for MemoryLink {
    async fn send_message(&self, user: &str, message: &str) -> Result<()> {
        if self.hub.fail_send.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("hub unreachable".into()));
        }
        self.hub
            .sent
            .lock()
            .push((user.to_string(), message.to_string()));
        let _ = self
            .tx
            .try_send(Ok(LiveEvent::Message(InboundMessage::new(user, message))));
        Ok(())
    }

    async fn close(&self) {
        self.tx.close();
    }
}

/// Transport handle; the hub itself is shared with the test.
pub struct MemoryTransport(pub Arc<MemoryHub>);

#[async_trait]
impl LiveTransport for MemoryTransport {
    async fn open(&self, _session: &SessionIdentity) -> Result<LiveChannel> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("connection refused".into()));
        }
        if self.0.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = async_channel::unbounded();
        self.0.channels.lock().push(tx.clone());
        Ok(LiveChannel {
            link: Arc::new(MemoryLink {
                hub: self.0.clone(),
                tx,
            }),
            events: rx,
        })
    }
}

/// Next appended message, skipping other store events.
pub async fn next_append(sub: &mut StoreSubscription) -> Message {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match sub.recv().await {
                Some(StoreEvent::Appended(message)) => return message,
                Some(_) => continue,
                None => panic!("store closed"),
            }
        }
    })
    .await
    .expect("no message appended in time")
}
