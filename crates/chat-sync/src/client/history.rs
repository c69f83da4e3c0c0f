//! One-shot history seed.

use crate::client::store::StoreHandle;
use crate::error::{ChatError, Result};
use crate::traits::HistoryStore;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

/// Loads the durable history into the store, successfully at most once per session.
pub struct HistoryLoader {
    storage: Arc<dyn HistoryStore>,
    state: watch::Sender<LoadState>,
}

impl HistoryLoader {
    pub fn new(storage: Arc<dyn HistoryStore>) -> Self {
        HistoryLoader {
            storage,
            state: watch::Sender::new(LoadState::NotLoaded),
        }
    }

    #[inline]
    pub fn state(&self) -> LoadState {
        *self.state.borrow()
    }

    /// Wait until no load is in flight.
    pub async fn settled(&self) -> LoadState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| *s != LoadState::Loading).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Fetch the history and seed `store` with it, replacing any content.
    ///
    /// On failure the store is left untouched and the error is returned for
    /// the caller to report; the session can carry on without history, and
    /// the caller may try again. Once a load has succeeded (or while one is
    /// running) further calls are rejected. History that arrives after live
    /// messages were merged is discarded with [`ChatError::SeedAfterLive`].
    pub async fn load(&self, store: &StoreHandle) -> Result<usize> {
        let mut busy = false;
        self.state.send_if_modified(|state| {
            if matches!(*state, LoadState::Loading | LoadState::Loaded) {
                busy = true;
                return false;
            }
            *state = LoadState::Loading;
            true
        });
        if busy {
            return Err(ChatError::HistoryAlreadyLoaded);
        }

        let seeded = self
            .storage
            .load_history()
            .await
            .and_then(|messages| {
                let count = messages.len();
                store.seed(messages).map(|()| count)
            });
        match seeded {
            Ok(count) => {
                self.state.send_replace(LoadState::Loaded);
                tracing::info!("[ChatHistory] Loaded {} messages", count);
                Ok(count)
            }
            Err(e) => {
                self.state.send_replace(LoadState::Failed);
                tracing::warn!("[ChatHistory] History not applied: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use async_trait::async_trait;

    struct FixedHistory(Result<Vec<Message>>);

    #[async_trait]
    impl HistoryStore for FixedHistory {
        async fn load_history(&self) -> Result<Vec<Message>> {
            self.0.clone()
        }
        async fn persist(&self, _message: &Message) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_seed_from_history() {
        let history = vec![Message::new(1, "bob", "hello", "10:00:00")];
        let loader = HistoryLoader::new(Arc::new(FixedHistory(Ok(history.clone()))));
        let store = StoreHandle::new();

        assert_eq!(loader.load(&store).await.unwrap(), 1);
        assert_eq!(store.snapshot(), history);
    }

    #[tokio::test]
    async fn test_failure_leaves_store_empty() {
        let loader = HistoryLoader::new(Arc::new(FixedHistory(Err(ChatError::Transport(
            "connection refused".into(),
        )))));
        let store = StoreHandle::new();

        let err = loader.load(&store).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_runs_once() {
        let loader = HistoryLoader::new(Arc::new(FixedHistory(Ok(vec![]))));
        let store = StoreHandle::new();
        loader.load(&store).await.unwrap();
        assert_eq!(loader.state(), LoadState::Loaded);
        assert!(matches!(
            loader.load(&store).await,
            Err(ChatError::HistoryAlreadyLoaded)
        ));
    }

    #[tokio::test]
    async fn test_caller_may_retry_after_failure() {
        let loader = HistoryLoader::new(Arc::new(FixedHistory(Err(ChatError::Timeout))));
        let store = StoreHandle::new();
        assert!(loader.load(&store).await.is_err());
        assert_eq!(loader.state(), LoadState::Failed);
        assert!(matches!(loader.load(&store).await, Err(ChatError::Timeout)));
    }

    #[tokio::test]
    async fn test_history_after_live_message_is_discarded() {
        let loader = HistoryLoader::new(Arc::new(FixedHistory(Ok(vec![Message::new(
            1, "bob", "hello", "10:00:00",
        )]))));
        let store = StoreHandle::new();
        store.merge_inbound(
            crate::types::InboundMessage::new("carol", "hey"),
            chrono::Local::now(),
        );

        assert!(matches!(loader.load(&store).await, Err(ChatError::SeedAfterLive)));
        assert_eq!(loader.state(), LoadState::Failed);
        assert_eq!(store.snapshot()[0].body, "hey");
        assert_eq!(loader.settled().await, LoadState::Failed);
    }
}
