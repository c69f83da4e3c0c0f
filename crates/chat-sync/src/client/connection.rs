//! Connection manager: owns the live channel and its lifecycle.
//!
//! Every state change happens under one lock together with an epoch bump
//! check. `stop()` advances the epoch, so a driver task, a pending open or a
//! reconnect attempt that belongs to an older epoch can never move the state
//! again or deliver another inbound message.

use crate::client::config::ClientConfig;
use crate::client::retry::{ReconnectConfig, RetryDecision, RetryState};
use crate::client::subscription::{HeartbeatConfig, LiveSubscription};
use crate::error::{ChatError, Result, SendFailure};
use crate::traits::{LiveEvent, LiveLink, LiveTransport};
use crate::types::{ConnectionState, InboundMessage, SessionIdentity};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Callback receiving inbound live messages in transport order.
///
/// Runs on the connection's driver task and must not block. It must not call
/// back into [`ConnectionManager::stop`] or [`ConnectionManager::on_message`].
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

struct Status {
    epoch: u64,
    state: ConnectionState,
    identity: Option<SessionIdentity>,
    link: Option<Arc<dyn LiveLink>>,
    driver: Option<JoinHandle<()>>,
}

struct Shared {
    transport: Arc<dyn LiveTransport>,
    reconnect: ReconnectConfig,
    server_timeout: Option<Duration>,
    status: Mutex<Status>,
    state_tx: watch::Sender<ConnectionState>,
    epoch_tx: watch::Sender<u64>,
    handler: RwLock<Option<(u64, InboundHandler)>>,
    next_handler_id: AtomicU64,
    last_error: Mutex<Option<ChatError>>,
}

impl Shared {
    /// Apply a transition. Callers hold the status lock.
    fn set_state(&self, status: &mut Status, to: ConnectionState) {
        let from = status.state;
        if from == to {
            return;
        }
        if !ConnectionState::can_transition(from, to) {
            tracing::warn!("[ChatConn] Unexpected transition {} -> {}", from, to);
        }
        status.state = to;
        self.state_tx.send_replace(to);
        tracing::info!("[ChatConn] {} -> {}", from, to);
    }

    fn current_epoch(&self) -> u64 {
        self.status.lock().epoch
    }

    fn subscription(&self, events: async_channel::Receiver<Result<LiveEvent>>) -> LiveSubscription {
        match self.server_timeout {
            Some(timeout) => LiveSubscription::with_heartbeat(events, HeartbeatConfig::new(timeout)),
            None => LiveSubscription::new(events),
        }
    }

    /// Hand a message to the registered callback if `epoch` is still current.
    fn deliver(&self, epoch: u64, message: InboundMessage) -> bool {
        let handler = self.handler.read();
        if self.current_epoch() != epoch {
            return false;
        }
        match handler.as_ref() {
            Some((_, callback)) => callback(message),
            None => tracing::debug!(
                "[ChatConn] No inbound handler, dropping message from {}",
                message.author
            ),
        }
        true
    }

    fn fail(&self, epoch: u64, error: ChatError) -> bool {
        let mut status = self.status.lock();
        if status.epoch != epoch {
            return false;
        }
        *self.last_error.lock() = Some(error);
        self.set_state(&mut status, ConnectionState::Failed);
        true
    }
}

/// Why an open channel stopped delivering.
#[derive(Debug)]
enum LiveDrop {
    Ended,
    Closed(Option<String>),
    Silent,
    Error(String),
}

impl std::fmt::Display for LiveDrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveDrop::Ended => f.write_str("live channel ended"),
            LiveDrop::Closed(Some(reason)) => write!(f, "server closed the connection: {}", reason),
            LiveDrop::Closed(None) => f.write_str("server closed the connection"),
            LiveDrop::Silent => f.write_str("server went silent"),
            LiveDrop::Error(e) => f.write_str(e),
        }
    }
}

/// Owns the live channel: connect, automatic reconnection, stop, and the
/// single inbound callback.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        reconnect: ReconnectConfig,
        server_timeout: Option<Duration>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (epoch_tx, _) = watch::channel(0);
        ConnectionManager {
            shared: Arc::new(Shared {
                transport,
                reconnect,
                server_timeout,
                status: Mutex::new(Status {
                    epoch: 0,
                    state: ConnectionState::Disconnected,
                    identity: None,
                    link: None,
                    driver: None,
                }),
                state_tx,
                epoch_tx,
                handler: RwLock::new(None),
                next_handler_id: AtomicU64::new(1),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(transport: Arc<dyn LiveTransport>, config: &ClientConfig) -> Self {
        Self::new(
            transport,
            config.reconnect.clone(),
            Some(config.server_timeout()),
        )
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Error that caused the most recent transition to `Failed`.
    pub fn last_error(&self) -> Option<ChatError> {
        self.shared.last_error.lock().clone()
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.shared.status.lock().identity.clone()
    }

    /// Open the live channel for `identity`.
    ///
    /// Allowed from `Disconnected` and `Failed`. Resolves once the channel
    /// is `Connected`, or with the error that moved it to `Failed`.
    pub async fn connect(&self, identity: &str) -> Result<()> {
        let identity = SessionIdentity::new(identity)?;

        let epoch = {
            let mut status = self.shared.status.lock();
            if !matches!(
                status.state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                return Err(ChatError::InvalidState {
                    op: "connect",
                    state: status.state,
                });
            }
            status.epoch += 1;
            self.shared.epoch_tx.send_replace(status.epoch);
            status.identity = Some(identity.clone());
            *self.shared.last_error.lock() = None;
            self.shared.set_state(&mut status, ConnectionState::Connecting);
            status.epoch
        };

        let mut epoch_rx = self.shared.epoch_tx.subscribe();
        let opened = tokio::select! {
            result = self.shared.transport.open(&identity) => result,
            _ = epoch_rx.wait_for(|e| *e != epoch) => {
                tracing::info!("[ChatConn] Pending connect cancelled by stop");
                return Err(ChatError::connecting("cancelled by stop"));
            }
        };

        match opened {
            Ok(channel) => {
                let stale_link = {
                    let mut status = self.shared.status.lock();
                    if status.epoch != epoch {
                        Some(channel.link)
                    } else {
                        status.link = Some(channel.link);
                        let driver = tokio::spawn(drive(
                            Arc::downgrade(&self.shared),
                            epoch,
                            identity.clone(),
                            channel.events,
                        ));
                        status.driver = Some(driver);
                        self.shared.set_state(&mut status, ConnectionState::Connected);
                        None
                    }
                };
                if let Some(link) = stale_link {
                    link.close().await;
                    return Err(ChatError::connecting("cancelled by stop"));
                }
                tracing::info!("[ChatConn] Connected as {}", identity);
                Ok(())
            }
            Err(e) => {
                let error = match e {
                    ChatError::Connection { .. } => e,
                    other => ChatError::connecting(other.to_string()),
                };
                tracing::warn!("[ChatConn] Connect failed: {}", error);
                self.shared.fail(epoch, error.clone());
                Err(error)
            }
        }
    }

    /// Close the live channel and cancel any reconnection. Idempotent.
    ///
    /// When this returns the state is `Disconnected`, transport resources are
    /// released and the inbound callback will not run again for this
    /// connection.
    pub async fn stop(&self) {
        let (previous, link, driver) = {
            let mut status = self.shared.status.lock();
            status.epoch += 1;
            self.shared.epoch_tx.send_replace(status.epoch);
            let previous = status.state;
            self.shared.set_state(&mut status, ConnectionState::Disconnected);
            (previous, status.link.take(), status.driver.take())
        };

        if let Some(driver) = driver {
            driver.abort();
            let _ = driver.await;
        }
        // Wait out a delivery that started before the epoch moved.
        drop(self.shared.handler.write());

        if let Some(link) = link {
            link.close().await;
        }
        if previous != ConnectionState::Disconnected {
            tracing::info!("[ChatConn] Stopped (was {})", previous);
        }
    }

    /// Register the inbound callback, replacing any previous one.
    pub fn on_message<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .shared
            .handler
            .write()
            .replace((id, Arc::new(handler)))
            .is_some();
        if replaced {
            tracing::debug!("[ChatConn] Inbound handler replaced");
        }
        HandlerRegistration {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Invoke `SendMessage` on the current link.
    pub async fn send_live(&self, user: &str, body: &str) -> Result<()> {
        let link = {
            let status = self.shared.status.lock();
            match (&status.link, status.state) {
                (Some(link), ConnectionState::Connected) => link.clone(),
                (_, state) => return Err(ChatError::Send(SendFailure::NotConnected(state))),
            }
        };
        link.send_message(user, body).await
    }

    /// While `Reconnecting`, wait up to `limit` for the outcome and return
    /// the state afterwards. Returns immediately in any other state.
    pub async fn settle_reconnect(&self, limit: Duration) -> ConnectionState {
        let mut rx = self.watch_state();
        let waited = tokio::time::timeout(
            limit,
            rx.wait_for(|s| *s != ConnectionState::Reconnecting),
        )
        .await;
        match waited {
            Ok(Ok(state)) => *state,
            _ => self.state(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut status = self.shared.status.lock();
        status.epoch += 1;
        if let Some(driver) = status.driver.take() {
            driver.abort();
        }
        status.link = None;
    }
}

/// Handle returned by [`ConnectionManager::on_message`].
pub struct HandlerRegistration {
    id: u64,
    shared: Weak<Shared>,
}

impl HandlerRegistration {
    /// Unregister the callback unless another one has replaced it since.
    pub fn cancel(self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut handler = shared.handler.write();
            if matches!(handler.as_ref(), Some((id, _)) if *id == self.id) {
                *handler = None;
                tracing::debug!("[ChatConn] Inbound handler cancelled");
            }
        }
    }
}

/// Pump events from the open channel; on a drop, reconnect with backoff.
async fn drive(
    shared: Weak<Shared>,
    epoch: u64,
    identity: SessionIdentity,
    events: async_channel::Receiver<Result<LiveEvent>>,
) {
    let mut events = events;
    loop {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        let mut subscription = strong.subscription(events);
        drop(strong);

        let cause = loop {
            let Some(event) = subscription.next().await else {
                break LiveDrop::Ended;
            };
            let Some(strong) = shared.upgrade() else {
                return;
            };
            match event {
                Ok(LiveEvent::Message(message)) => {
                    if !strong.deliver(epoch, message) {
                        return;
                    }
                }
                Ok(LiveEvent::KeepAlive) => {}
                Ok(LiveEvent::Closed { reason }) => break LiveDrop::Closed(reason),
                Err(ChatError::Timeout) => break LiveDrop::Silent,
                Err(e) => break LiveDrop::Error(e.to_string()),
            }
        };
        subscription.close();

        let Some(strong) = shared.upgrade() else {
            return;
        };
        let old_link = {
            let mut status = strong.status.lock();
            if status.epoch != epoch {
                return;
            }
            strong.set_state(&mut status, ConnectionState::Reconnecting);
            status.link.take()
        };
        tracing::warn!("[ChatConn] Live channel dropped: {}", cause);
        if let Some(link) = old_link {
            link.close().await;
        }

        match reconnect(&strong, epoch, &identity, cause.to_string()).await {
            Some(next) => events = next,
            None => return,
        }
    }
}

async fn reconnect(
    shared: &Arc<Shared>,
    epoch: u64,
    identity: &SessionIdentity,
    mut last_reason: String,
) -> Option<async_channel::Receiver<Result<LiveEvent>>> {
    let mut retry = RetryState::new(shared.reconnect.clone());

    loop {
        let delay = match retry.next_attempt() {
            RetryDecision::Retry(delay) => delay,
            RetryDecision::DontRetry => {
                tracing::error!(
                    "[ChatConn] Giving up after {} reconnect attempts: {}",
                    retry.attempts.saturating_sub(1),
                    last_reason
                );
                shared.fail(epoch, ChatError::reconnecting(last_reason));
                return None;
            }
        };

        if !delay.is_zero() {
            tracing::info!("[ChatConn] Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        if shared.current_epoch() != epoch {
            return None;
        }

        match shared.transport.open(identity).await {
            Ok(channel) => {
                let stale = {
                    let mut status = shared.status.lock();
                    if status.epoch != epoch {
                        true
                    } else {
                        status.link = Some(channel.link.clone());
                        shared.set_state(&mut status, ConnectionState::Connected);
                        false
                    }
                };
                if stale {
                    channel.link.close().await;
                    return None;
                }
                tracing::info!("[ChatConn] Reconnected after {} attempts", retry.attempts);
                return Some(channel.events);
            }
            Err(e) => {
                tracing::warn!("[ChatConn] Reconnect attempt {} failed: {}", retry.attempts, e);
                last_reason = e.to_string();
            }
        }
    }
}
