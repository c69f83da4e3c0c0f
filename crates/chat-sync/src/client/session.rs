//! Chat session: the surface a rendering layer talks to.

use crate::client::config::ClientConfig;
use crate::client::connection::{ConnectionManager, HandlerRegistration};
use crate::client::dispatcher::{DispatchOptions, MessageDispatcher, SendReceipt};
use crate::client::history::{HistoryLoader, LoadState};
use crate::client::http_store::HttpHistoryStore;
use crate::client::hub::HubTransport;
use crate::client::store::{StoreHandle, StoreSubscription};
use crate::error::{ChatError, Result, SendFailure};
use crate::traits::{HistoryStore, LiveTransport};
use crate::types::{ConnectionState, Message, SessionIdentity};
use chrono::Local;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// One chat session: history seed, live connection and send path sharing a
/// single message store.
pub struct ChatSession {
    config: Arc<ClientConfig>,
    store: StoreHandle,
    history: HistoryLoader,
    connection: Arc<ConnectionManager>,
    dispatcher: MessageDispatcher,
    identity: Mutex<Option<SessionIdentity>>,
    registration: Mutex<Option<HandlerRegistration>>,
}

impl ChatSession {
    pub fn new(
        config: ClientConfig,
        storage: Arc<dyn HistoryStore>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let store = StoreHandle::new();
        let connection = Arc::new(ConnectionManager::from_config(transport, &config));

        let inbound = store.clone();
        let registration = connection.on_message(move |message| {
            inbound.merge_inbound(message, Local::now());
        });

        let dispatcher = MessageDispatcher::new(
            connection.clone(),
            storage.clone(),
            store.clone(),
            DispatchOptions::from_config(&config),
        );

        ChatSession {
            config: Arc::new(config),
            store,
            history: HistoryLoader::new(storage),
            connection,
            dispatcher,
            identity: Mutex::new(None),
            registration: Mutex::new(Some(registration)),
        }
    }

    /// Session against a real server: HTTP storage plus the WebSocket hub.
    pub fn connect_to(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(HttpHistoryStore::with_config(&config)?);
        let transport = Arc::new(HubTransport::with_config(&config)?);
        Ok(Self::new(config, storage, transport))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Seed the store from durable storage.
    ///
    /// Must run before the live channel is opened. A failure leaves the store
    /// empty and is returned for the caller to show; the session stays usable
    /// and the load may be retried until a live message has been merged.
    pub async fn load_history(&self) -> Result<usize> {
        let state = self.connection.state();
        if state.is_active() || self.store.is_live() {
            return Err(ChatError::InvalidState {
                op: "load history",
                state,
            });
        }
        self.history.load(&self.store).await
    }

    pub fn history_state(&self) -> LoadState {
        self.history.state()
    }

    /// Connect the live channel. The first valid identity is kept for the
    /// rest of the session; later calls must use the same one.
    ///
    /// A history load still in flight is awaited first, so live messages are
    /// never merged into a store that is about to be seeded.
    pub async fn connect(&self, identity: &str) -> Result<()> {
        let identity = SessionIdentity::new(identity)?;
        {
            let mut bound = self.identity.lock();
            match bound.as_ref() {
                Some(existing) if *existing != identity => {
                    return Err(ChatError::InvalidSession(format!(
                        "session belongs to {}",
                        existing
                    )));
                }
                Some(_) => {}
                None => *bound = Some(identity.clone()),
            }
        }
        if self.history.state() == LoadState::Loading {
            tracing::debug!("[ChatHistory] Waiting for history before connecting");
            self.history.settled().await;
        }
        self.connection.connect(identity.as_str()).await
    }

    /// Send `body` as the session identity.
    pub async fn send(&self, body: &str) -> Result<SendReceipt> {
        let identity = self.identity.lock().clone();
        let Some(identity) = identity else {
            return Err(ChatError::Send(SendFailure::NotConnected(
                self.connection.state(),
            )));
        };
        let receipt = self.dispatcher.send(identity.as_str(), body).await?;
        for warning in &receipt.warnings {
            tracing::warn!("[ChatSend] {}", warning);
        }
        Ok(receipt)
    }

    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn subscribe(&self) -> StoreSubscription {
        self.store.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.connection.last_error()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.get_mut().take() {
            registration.cancel();
        }
    }
}
