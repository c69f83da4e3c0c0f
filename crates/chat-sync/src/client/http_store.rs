//! Durable storage over plain HTTP: `GET` the history, `POST` each sent message.

use crate::client::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::traits::HistoryStore;
use crate::types::{Message, StorageRequest, StorageResponse};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

pub struct HttpHistoryStore {
    client: Client,
    history_url: Url,
}

impl HttpHistoryStore {
    pub fn new(client: Client, history_url: Url) -> Self {
        Self {
            client,
            history_url,
        }
    }

    pub fn with_config(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(Self::new(client, config.history_url()?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    #[inline]
    pub fn history_url(&self) -> &Url {
        &self.history_url
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        if path.is_empty() {
            return Ok(self.history_url.clone());
        }
        self.history_url
            .join(path)
            .map_err(|e| ChatError::Config(format!("invalid storage path {}: {}", path, e)))
    }

    pub async fn fetch(&self, request: StorageRequest) -> Result<StorageResponse> {
        let method = match request.method.to_uppercase().as_str() {
            "POST" => reqwest::Method::POST,
            _ => reqwest::Method::GET,
        };
        let url = self.resolve(&request.path)?;

        let mut req_builder = self.client.request(method.clone(), url.clone());
        if request.has_body() {
            let ct = request
                .content_type
                .as_deref()
                .unwrap_or("application/json");
            req_builder = req_builder
                .header(reqwest::header::CONTENT_TYPE, ct)
                .body(request.body.clone());
        }

        tracing::debug!("[ChatStorage] {} {}", method, url);

        let response = req_builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(StorageResponse::new(status, body))
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn load_history(&self) -> Result<Vec<Message>> {
        let response = self
            .fetch(StorageRequest::get(""))
            .await?
            .error_for_status()?;
        let messages: Vec<Message> = response.json()?;
        tracing::debug!(
            "[ChatStorage] History returned {} messages from {}",
            messages.len(),
            self.history_url
        );
        Ok(messages)
    }

    async fn persist(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        self.fetch(StorageRequest::post_json("", body))
            .await?
            .error_for_status()?;
        tracing::debug!("[ChatStorage] Persisted message {}", message.id);
        Ok(())
    }
}
