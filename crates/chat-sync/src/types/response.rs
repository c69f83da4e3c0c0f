//! Response from the durable-storage endpoint.

use crate::error::{ChatError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;

#[derive(Clone, Debug)]
pub struct StorageResponse {
    pub status: u16,
    pub body: Bytes,
}

impl StorageResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        StorageResponse {
            status,
            body: body.into(),
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with [`ChatError::Transport`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let detail: String = self
            .body_str()
            .unwrap_or("")
            .trim()
            .chars()
            .take(200)
            .collect();
        Err(ChatError::Transport(format!(
            "storage responded {}{}{}",
            self.status,
            if detail.is_empty() { "" } else { ": " },
            detail
        )))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
