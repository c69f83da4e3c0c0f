//! Outbound send path: the live invoke and the durable write.

use crate::client::config::{ClientConfig, EchoPolicy, OfflineSendPolicy, SendMode};
use crate::client::connection::ConnectionManager;
use crate::client::merge::PendingEcho;
use crate::client::store::StoreHandle;
use crate::client::utils::preview;
use crate::error::{ChatError, Result, SendFailure};
use crate::traits::HistoryStore;
use crate::types::{send_stamp, ConnectionState, Message};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A path of a send that failed while the other one succeeded.
#[derive(Debug, Clone)]
pub enum SendWarning {
    /// Other clients will not see the message until they reload history.
    LiveFailed(ChatError),
    /// The message was broadcast but will be missing from history.
    DurableFailed(ChatError),
}

impl std::fmt::Display for SendWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendWarning::LiveFailed(e) => write!(f, "live broadcast failed: {}", e),
            SendWarning::DurableFailed(e) => write!(f, "storage write failed: {}", e),
        }
    }
}

/// Outcome of a send that succeeded on at least one path.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// The record written to storage.
    pub record: Message,
    /// The local echo appended to the store, if the echo policy appends one.
    pub local_echo: Option<Message>,
    pub warnings: Vec<SendWarning>,
}

impl SendReceipt {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub send_mode: SendMode,
    pub offline_send: OfflineSendPolicy,
    pub reconnect_wait: Duration,
    pub echo_policy: EchoPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl DispatchOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        DispatchOptions {
            send_mode: config.send_mode,
            offline_send: config.offline_send,
            reconnect_wait: config.reconnect_wait(),
            echo_policy: config.echo_policy,
        }
    }
}

pub struct MessageDispatcher {
    connection: Arc<ConnectionManager>,
    storage: Arc<dyn HistoryStore>,
    store: StoreHandle,
    options: DispatchOptions,
}

impl MessageDispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        storage: Arc<dyn HistoryStore>,
        store: StoreHandle,
        options: DispatchOptions,
    ) -> Self {
        MessageDispatcher {
            connection,
            storage,
            store,
            options,
        }
    }

    #[inline]
    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Send `body` as `author` over both paths. No retries.
    ///
    /// Fails when the body is blank, when the connection is not `Connected`,
    /// or when both paths fail; the store is unchanged in all three cases.
    pub async fn send(&self, author: &str, body: &str) -> Result<SendReceipt> {
        if body.trim().is_empty() {
            return Err(ChatError::Send(SendFailure::EmptyBody));
        }
        self.ensure_connected().await?;

        let timestamp = send_stamp(Utc::now());
        let record = Message::new(self.store.next_id(), author, body, timestamp.clone());

        let correlation_id = if self.options.echo_policy == EchoPolicy::LocalDeduplicated {
            let echo = PendingEcho::new(author, body);
            let id = echo.correlation_id;
            self.store.register_pending_echo(echo);
            id
        } else {
            Uuid::new_v4()
        };

        tracing::debug!(
            "[ChatSend] {} -> {:?} ({})",
            author,
            preview(body, 40),
            correlation_id
        );

        let (live, durable) = match self.options.send_mode {
            SendMode::AwaitBoth => {
                let (live, durable) = tokio::join!(
                    self.connection.send_live(author, body),
                    self.storage.persist(&record)
                );
                (live, Some(durable))
            }
            SendMode::LiveFirst => self.send_live_first(author, body, &record).await,
        };

        let mut warnings = Vec::new();
        match (live, durable) {
            (Err(live), Some(Err(durable))) => {
                self.store.cancel_pending_echo(correlation_id);
                tracing::error!(
                    "[ChatSend] Both paths failed: live: {}, storage: {}",
                    live,
                    durable
                );
                return Err(ChatError::Send(SendFailure::BothPathsFailed {
                    live: live.to_string(),
                    durable: durable.to_string(),
                }));
            }
            (Err(live), _) => {
                self.store.cancel_pending_echo(correlation_id);
                tracing::warn!("[ChatSend] Live broadcast failed, message stored only: {}", live);
                warnings.push(SendWarning::LiveFailed(live));
            }
            (Ok(()), Some(Err(durable))) => {
                tracing::warn!("[ChatSend] Storage write failed, message broadcast only: {}", durable);
                warnings.push(SendWarning::DurableFailed(durable));
            }
            (Ok(()), _) => {}
        }

        let local_echo = match self.options.echo_policy {
            EchoPolicy::HubOnly => None,
            EchoPolicy::LocalAppend | EchoPolicy::LocalDeduplicated => Some(
                self.store
                    .append_local_echo(author, body, &timestamp, correlation_id),
            ),
        };

        Ok(SendReceipt {
            record,
            local_echo,
            warnings,
        })
    }

    /// Start the storage write in the background and await the live path.
    /// The storage outcome is only awaited when the live path fails.
    async fn send_live_first(
        &self,
        author: &str,
        body: &str,
        record: &Message,
    ) -> (Result<()>, Option<Result<()>>) {
        let storage = self.storage.clone();
        let owned = record.clone();
        let durable = tokio::spawn(async move { storage.persist(&owned).await });

        match self.connection.send_live(author, body).await {
            Ok(()) => {
                let id = record.id;
                tokio::spawn(async move {
                    match durable.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!("[ChatSend] Background storage write of {} failed: {}", id, e)
                        }
                        Err(e) => {
                            tracing::warn!("[ChatSend] Background storage write of {} aborted: {}", id, e)
                        }
                    }
                });
                (Ok(()), None)
            }
            Err(live) => {
                let durable = durable.await.unwrap_or_else(|e| {
                    Err(ChatError::Transport(format!("storage task failed: {}", e)))
                });
                (Err(live), Some(durable))
            }
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut state = self.connection.state();
        if state == ConnectionState::Reconnecting
            && self.options.offline_send == OfflineSendPolicy::WaitForReconnect
        {
            tracing::debug!("[ChatSend] Waiting for reconnect before sending");
            state = self
                .connection
                .settle_reconnect(self.options.reconnect_wait)
                .await;
        }
        if state.is_connected() {
            Ok(())
        } else {
            Err(ChatError::Send(SendFailure::NotConnected(state)))
        }
    }
}
