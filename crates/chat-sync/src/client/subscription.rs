//! Inbound event stream of an open live channel.

use crate::error::{ChatError, Result};
use crate::traits::LiveEvent;
use std::time::{Duration, Instant};

/// Configuration for server-silence detection.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub timeout: Duration,
}

impl HeartbeatConfig {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Wraps the transport's event receiver, turning server silence into
/// [`ChatError::Timeout`].
pub struct LiveSubscription {
    receiver: async_channel::Receiver<Result<LiveEvent>>,
    heartbeat_config: Option<HeartbeatConfig>,
    last_activity: Instant,
}

impl LiveSubscription {
    pub fn new(receiver: async_channel::Receiver<Result<LiveEvent>>) -> Self {
        LiveSubscription {
            receiver,
            heartbeat_config: None,
            last_activity: Instant::now(),
        }
    }

    pub fn with_heartbeat(
        receiver: async_channel::Receiver<Result<LiveEvent>>,
        heartbeat_config: HeartbeatConfig,
    ) -> Self {
        LiveSubscription {
            receiver,
            heartbeat_config: Some(heartbeat_config),
            last_activity: Instant::now(),
        }
    }

    /// Next event; `None` once the transport has closed its side.
    pub async fn next(&mut self) -> Option<Result<LiveEvent>> {
        if let Some(ref config) = self.heartbeat_config {
            let deadline = self.last_activity + config.timeout;
            tokio::select! {
                result = self.receiver.recv() => {
                    self.last_activity = Instant::now();
                    result.ok()
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    Some(Err(ChatError::Timeout))
                }
            }
        } else {
            let result = self.receiver.recv().await.ok();
            self.last_activity = Instant::now();
            result
        }
    }

    pub fn close(&self) {
        self.receiver.close();
    }
}
