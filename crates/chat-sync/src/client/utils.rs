//! Utility functions for the chat client.

use crate::error::{ChatError, Result};
use crate::protocol::constants::NEGOTIATE_VERSION;
use url::Url;

/// `{hub}/negotiate?negotiateVersion=1`, keeping any query the hub URL has.
pub fn negotiate_url(hub: &Url) -> Result<Url> {
    let mut url = hub.clone();
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
    Ok(url)
}

/// WebSocket URL for the hub, with the negotiated connection token as `id`.
pub fn socket_url(hub: &Url, connection_token: Option<&str>) -> Result<Url> {
    let scheme = match hub.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatError::Config(format!(
                "cannot derive socket scheme from {}",
                other
            )))
        }
    };

    let mut url = hub.clone();
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Config(format!("cannot set scheme {} on {}", scheme, hub)))?;
    if let Some(token) = connection_token {
        url.query_pairs_mut().append_pair("id", token);
    }
    Ok(url)
}

/// Shorten a body for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
