//! Negotiate exchange that precedes the hub socket.

use crate::error::{ChatError, Result};
use crate::protocol::constants::transports;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub negotiate_version: Option<u32>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect to another service, set by hosted hubs.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

impl NegotiateResponse {
    /// Token to pass as `id` on the socket URL.
    ///
    /// Version 1 servers issue a separate connection token; older servers
    /// only hand out the connection id.
    pub fn socket_id(&self) -> Option<&str> {
        self.connection_token
            .as_deref()
            .or(self.connection_id.as_deref())
    }

    pub fn supports_websockets(&self) -> bool {
        self.available_transports.is_empty()
            || self
                .available_transports
                .iter()
                .any(|t| t.transport.eq_ignore_ascii_case(transports::WEB_SOCKETS))
    }

    /// Fail unless the server accepted the negotiation and offers WebSockets.
    pub fn validate(&self) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(ChatError::connecting(format!("negotiate rejected: {}", error)));
        }
        if self.url.is_some() {
            return Err(ChatError::connecting(
                "negotiate redirect is not supported".to_string(),
            ));
        }
        if !self.supports_websockets() {
            return Err(ChatError::connecting(
                "hub does not offer the WebSockets transport".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v1_response() {
        let body = r#"{
            "connectionId": "abc",
            "connectionToken": "tok",
            "negotiateVersion": 1,
            "availableTransports": [
                {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]},
                {"transport": "LongPolling", "transferFormats": ["Text"]}
            ]
        }"#;
        let resp: NegotiateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.socket_id(), Some("tok"));
        assert!(resp.validate().is_ok());
    }

    #[test]
    fn test_no_websockets() {
        let body = r#"{"connectionId":"abc","availableTransports":[{"transport":"LongPolling"}]}"#;
        let resp: NegotiateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.socket_id(), Some("abc"));
        assert!(resp.validate().is_err());
    }

    #[test]
    fn test_error_field() {
        let resp: NegotiateResponse = serde_json::from_str(r#"{"error":"denied"}"#).unwrap();
        let err = resp.validate().unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
