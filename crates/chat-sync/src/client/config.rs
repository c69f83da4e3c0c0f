//! Configuration for the chat client.
//!
//! Resolution order for [`ClientConfig::load`]:
//! 1. an explicit file path
//! 2. the file named by `CHAT_SYNC_CONFIG`
//! 3. `<config dir>/chat-sync/config.json`
//! 4. built-in defaults
//!
//! `CHAT_SERVER_URL` then overrides `base_url`.

use crate::client::retry::ReconnectConfig;
use crate::error::{ChatError, Result};
use crate::protocol::constants::{DEFAULT_HISTORY_PATH, DEFAULT_HUB_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const CONFIG_ENV: &str = "CHAT_SYNC_CONFIG";
pub const SERVER_URL_ENV: &str = "CHAT_SERVER_URL";

/// How the two transmission paths of a send are awaited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Resolve once both the live invoke and the storage write have finished.
    #[default]
    AwaitBoth,
    /// Resolve as soon as the live invoke succeeds; the storage write
    /// finishes in the background.
    LiveFirst,
}

/// What `send` does when the connection is not `Connected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineSendPolicy {
    #[default]
    FailFast,
    /// While `Reconnecting`, wait up to `reconnect_wait_ms` for the outcome.
    WaitForReconnect,
}

/// How the sender's own messages reach its store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Only the hub broadcast adds the message.
    HubOnly,
    /// Append locally and also append the hub echo.
    LocalAppend,
    /// Append locally and suppress the matching hub echo.
    #[default]
    LocalDeduplicated,
}

/// Configuration for the chat client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server origin, e.g. `https://localhost:7221`.
    pub base_url: String,
    pub history_path: String,
    pub hub_path: String,
    /// Timeout for history and persist requests.
    pub request_timeout_ms: u64,
    /// How long a `SendMessage` invocation may wait for its completion.
    pub invoke_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Interval between client pings on the hub socket.
    pub keep_alive_interval_ms: u64,
    /// Server silence after which the socket counts as dropped.
    pub server_timeout_ms: u64,
    /// Connect the socket directly, without the negotiate request.
    pub skip_negotiation: bool,
    pub reconnect: ReconnectConfig,
    pub send_mode: SendMode,
    pub offline_send: OfflineSendPolicy,
    pub reconnect_wait_ms: u64,
    pub echo_policy: EchoPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "https://localhost:7221".to_string(),
            history_path: DEFAULT_HISTORY_PATH.to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            request_timeout_ms: 30_000,
            invoke_timeout_ms: 15_000,
            handshake_timeout_ms: 15_000,
            keep_alive_interval_ms: 15_000,
            server_timeout_ms: 30_000,
            skip_negotiation: false,
            reconnect: ReconnectConfig::default(),
            send_mode: SendMode::AwaitBoth,
            offline_send: OfflineSendPolicy::FailFast,
            reconnect_wait_ms: 10_000,
            echo_policy: EchoPolicy::LocalDeduplicated,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Persistent per-user config location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("chat-sync").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ChatError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

        let config = if let Some(path) = explicit {
            Self::from_file(path)?
        } else if let Some(path) = from_env {
            Self::from_file(&path)?
        } else {
            match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            }
        };

        let config = config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!("[ChatConfig] base_url overridden by {}", SERVER_URL_ENV);
                self.base_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.history_url()?;
        let hub = self.hub_url()?;
        if !matches!(hub.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ChatError::Config(format!(
                "unsupported hub scheme: {}",
                hub.scheme()
            )));
        }
        if self.keep_alive_interval_ms == 0 || self.server_timeout_ms <= self.keep_alive_interval_ms {
            return Err(ChatError::Config(
                "server_timeout_ms must exceed keep_alive_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn history_url(&self) -> Result<Url> {
        join_url(&self.base_url, &self.history_path)
    }

    pub fn hub_url(&self) -> Result<Url> {
        join_url(&self.base_url, &self.hub_path)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[inline]
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[inline]
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    #[inline]
    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    #[inline]
    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }
}

fn join_url(base: &str, path: &str) -> Result<Url> {
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|e| ChatError::Config(format!("invalid url {}: {}", joined, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.history_path, "/Chat");
        assert_eq!(config.hub_path, "/chathub");
        assert_eq!(config.send_mode, SendMode::AwaitBoth);
        assert_eq!(config.offline_send, OfflineSendPolicy::FailFast);
        assert_eq!(config.echo_policy, EchoPolicy::LocalDeduplicated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_urls() {
        let config = ClientConfig::with_base_url("http://localhost:5000/");
        assert_eq!(config.history_url().unwrap().as_str(), "http://localhost:5000/Chat");
        assert_eq!(config.hub_url().unwrap().as_str(), "http://localhost:5000/chathub");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig::with_base_url("not a url");
        assert!(matches!(config.validate(), Err(ChatError::Config(_))));
    }

    #[test]
    fn test_timeouts_must_be_ordered() {
        let config = ClientConfig {
            keep_alive_interval_ms: 30_000,
            server_timeout_ms: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"base_url":"http://chat.local","echo_policy":"hub_only","reconnect":{"max_attempts":2}}"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.base_url, "http://chat.local");
        assert_eq!(config.echo_policy, EchoPolicy::HubOnly);
        assert_eq!(config.reconnect.max_attempts, Some(2));
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            ClientConfig::from_file(&path),
            Err(ChatError::Config(_))
        ));
    }
}
