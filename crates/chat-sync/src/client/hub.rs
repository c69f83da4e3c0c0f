//! Live channel over a hub WebSocket using the JSON hub protocol.
//!
//! Opening a channel runs the optional negotiate request, connects the socket
//! and completes the handshake. After that two tasks own the socket: a writer
//! draining the outbound queue and sending keep-alive pings, and a reader
//! turning frames into [`LiveEvent`]s and resolving pending invocations.

use crate::client::config::ClientConfig;
use crate::client::utils::{negotiate_url, preview, socket_url};
use crate::error::{ChatError, Result};
use crate::protocol::{
    format_close, format_handshake, format_invocation, format_ping, inbound_from_invocation,
    methods, FrameParser, HubFrame, NegotiateResponse,
};
use crate::traits::{LiveChannel, LiveEvent, LiveLink, LiveTransport};
use crate::types::SessionIdentity;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingInvocations = Arc<Mutex<HashMap<String, oneshot::Sender<Result<()>>>>>;

const EVENT_BUFFER: usize = 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Opens hub connections for a configured server.
pub struct HubTransport {
    http: reqwest::Client,
    hub_url: Url,
    skip_negotiation: bool,
    handshake_timeout: Duration,
    invoke_timeout: Duration,
    keep_alive_interval: Duration,
}

impl HubTransport {
    pub fn with_config(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.handshake_timeout())
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(HubTransport {
            http,
            hub_url: config.hub_url()?,
            skip_negotiation: config.skip_negotiation,
            handshake_timeout: config.handshake_timeout(),
            invoke_timeout: config.invoke_timeout(),
            keep_alive_interval: config.keep_alive_interval(),
        })
    }

    #[inline]
    pub fn hub_url(&self) -> &Url {
        &self.hub_url
    }

    /// Ask the hub for a connection token.
    async fn negotiate(&self) -> Result<Option<String>> {
        let url = negotiate_url(&self.hub_url)?;
        tracing::debug!("[ChatHub] Negotiating at {}", url);

        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| ChatError::connecting(format!("negotiate failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::connecting(format!(
                "negotiate responded {}",
                status.as_u16()
            )));
        }
        let negotiated: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| ChatError::connecting(format!("bad negotiate response: {}", e)))?;
        negotiated.validate()?;
        Ok(negotiated.socket_id().map(str::to_string))
    }

    async fn connect_socket(&self, url: &Url) -> Result<WsStream> {
        let connect = connect_async(url.as_str());
        let (ws, _) = tokio::time::timeout(self.handshake_timeout, connect)
            .await
            .map_err(|_| ChatError::connecting("timed out opening hub socket"))?
            .map_err(|e| ChatError::connecting(format!("hub socket: {}", e)))?;
        Ok(ws)
    }
}

#[async_trait]
impl LiveTransport for HubTransport {
    async fn open(&self, session: &SessionIdentity) -> Result<LiveChannel> {
        let token = if self.skip_negotiation {
            None
        } else {
            self.negotiate().await?
        };
        let url = socket_url(&self.hub_url, token.as_deref())?;
        tracing::info!("[ChatHub] Opening hub socket for {}", session);

        let ws = self.connect_socket(&url).await?;
        let (mut write, mut read) = ws.split();

        write
            .send(WsMessage::Text(format_handshake().into()))
            .await
            .map_err(|e| ChatError::connecting(format!("handshake send: {}", e)))?;

        let mut parser = FrameParser::new();
        let backlog = tokio::time::timeout(
            self.handshake_timeout,
            await_handshake(&mut read, &mut parser),
        )
        .await
        .map_err(|_| ChatError::connecting("timed out waiting for hub handshake"))??;

        let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let pending: PendingInvocations = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(run_writer(write, out_rx, self.keep_alive_interval));
        let reader = tokio::spawn(run_reader(
            read,
            parser,
            backlog,
            event_tx,
            pending.clone(),
        ));

        tracing::info!("[ChatHub] Hub handshake complete");

        let link = HubLink {
            outbound: out_tx,
            pending,
            next_invocation: AtomicU64::new(0),
            invoke_timeout: self.invoke_timeout,
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        };

        Ok(LiveChannel {
            link: Arc::new(link),
            events: event_rx,
        })
    }
}

/// Read until the handshake reply arrives. Frames that came in the same
/// socket message are returned for the reader task.
async fn await_handshake(
    read: &mut SplitStream<WsStream>,
    parser: &mut FrameParser,
) -> Result<Vec<HubFrame>> {
    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| ChatError::connecting(format!("hub socket: {}", e)))?;
        let frames = match &msg {
            WsMessage::Text(text) => parser.feed(text.as_str().as_bytes())?,
            WsMessage::Binary(data) => parser.feed(data)?,
            WsMessage::Close(_) => {
                return Err(ChatError::connecting("hub closed the socket during handshake"))
            }
            _ => continue,
        };

        let mut frames = frames.into_iter();
        match frames.next() {
            Some(HubFrame::Handshake { error: Some(error) }) => {
                return Err(ChatError::connecting(format!("handshake rejected: {}", error)))
            }
            Some(HubFrame::Handshake { error: None }) => return Ok(frames.collect()),
            Some(other) => {
                return Err(ChatError::Protocol(format!(
                    "expected handshake, got {:?}",
                    other
                )))
            }
            None => continue,
        }
    }
    Err(ChatError::connecting("hub socket ended during handshake"))
}

enum Outbound {
    Frame(String),
    Close,
}

async fn run_writer(
    mut write: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    keep_alive: Duration,
) {
    let start = tokio::time::Instant::now() + keep_alive;
    let mut ticker = tokio::time::interval_at(start, keep_alive);

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        tracing::warn!("[ChatHub] Write failed: {}", e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(WsMessage::Text(format_close(None).into())).await;
                    let _ = write.close().await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = write.send(WsMessage::Text(format_ping().into())).await {
                    tracing::warn!("[ChatHub] Keep-alive failed: {}", e);
                    break;
                }
            }
        }
    }
    tracing::debug!("[ChatHub] Writer stopped");
}

async fn run_reader(
    mut read: SplitStream<WsStream>,
    mut parser: FrameParser,
    backlog: Vec<HubFrame>,
    events: async_channel::Sender<Result<LiveEvent>>,
    pending: PendingInvocations,
) {
    let mut open = true;
    for frame in backlog {
        if !handle_frame(frame, &events, &pending).await {
            open = false;
            break;
        }
    }

    while open {
        let Some(msg) = read.next().await else {
            break;
        };
        let frames = match msg {
            Ok(WsMessage::Text(text)) => parser.feed(text.as_str().as_bytes()),
            Ok(WsMessage::Binary(data)) => parser.feed(&data),
            Ok(WsMessage::Close(frame)) => {
                let reason = frame.map(|f| f.reason.as_str().to_string()).filter(|r| !r.is_empty());
                let _ = events.send(Ok(LiveEvent::Closed { reason })).await;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(Err(e.into())).await;
                break;
            }
        };

        match frames {
            Ok(frames) => {
                for frame in frames {
                    if !handle_frame(frame, &events, &pending).await {
                        open = false;
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("[ChatHub] Dropping connection on bad frame: {}", e);
                let _ = events.send(Err(e)).await;
                break;
            }
        }
    }

    fail_pending(&pending);
    tracing::debug!("[ChatHub] Reader stopped");
}

/// Resolve every outstanding invocation with a closed-connection error.
fn fail_pending(pending: &PendingInvocations) -> usize {
    let orphaned: Vec<_> = pending.lock().drain().collect();
    let count = orphaned.len();
    for (_, tx) in orphaned {
        let _ = tx.send(Err(ChatError::Transport(
            "hub connection closed before completion".to_string(),
        )));
    }
    count
}

/// Returns `false` once the connection should be treated as ended.
async fn handle_frame(
    frame: HubFrame,
    events: &async_channel::Sender<Result<LiveEvent>>,
    pending: &PendingInvocations,
) -> bool {
    match frame {
        HubFrame::Invocation {
            target, arguments, ..
        } => match inbound_from_invocation(&target, &arguments) {
            Some(Ok(message)) => {
                tracing::trace!(
                    "[ChatHub] {} from {}: {}",
                    target,
                    message.author,
                    preview(&message.body, 40)
                );
                events.send(Ok(LiveEvent::Message(message))).await.is_ok()
            }
            Some(Err(e)) => {
                tracing::warn!("[ChatHub] Skipping malformed {}: {}", target, e);
                true
            }
            None => {
                tracing::debug!("[ChatHub] No handler for hub method {}", target);
                true
            }
        },
        HubFrame::Completion {
            invocation_id,
            error,
            ..
        } => {
            let waiter = pending.lock().remove(&invocation_id);
            match waiter {
                Some(tx) => {
                    let outcome = match error {
                        Some(e) => Err(ChatError::Transport(format!(
                            "hub rejected {}: {}",
                            methods::SEND_MESSAGE,
                            e
                        ))),
                        None => Ok(()),
                    };
                    let _ = tx.send(outcome);
                }
                None => tracing::debug!("[ChatHub] Completion for unknown invocation {}", invocation_id),
            }
            true
        }
        HubFrame::Ping => events.send(Ok(LiveEvent::KeepAlive)).await.is_ok(),
        HubFrame::Close {
            error,
            allow_reconnect,
        } => {
            tracing::info!(
                "[ChatHub] Server closed the connection (error: {:?}, allow_reconnect: {})",
                error,
                allow_reconnect
            );
            let _ = events.send(Ok(LiveEvent::Closed { reason: error })).await;
            false
        }
        HubFrame::Handshake { .. } | HubFrame::Ignored(_) => true,
    }
}

/// Outbound half of an open hub connection.
pub struct HubLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingInvocations,
    next_invocation: AtomicU64,
    invoke_timeout: Duration,
    closed: AtomicBool,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LiveLink for HubLink {
    async fn send_message(&self, user: &str, message: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChatError::Transport("hub connection closed".to_string()));
        }

        let id = self.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let frame = format_invocation(
            Some(&id),
            methods::SEND_MESSAGE,
            &[json!(user), json!(message)],
        );
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            self.pending.lock().remove(&id);
            return Err(ChatError::Transport("hub connection closed".to_string()));
        }

        match tokio::time::timeout(self.invoke_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChatError::Transport(
                "hub connection closed before completion".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ChatError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);

        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let orphaned = fail_pending(&self.pending);
        if orphaned > 0 {
            tracing::debug!("[ChatHub] Failed {} in-flight invocations on close", orphaned);
        }
        tracing::debug!("[ChatHub] Link closed");
    }
}

impl Drop for HubLink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}
