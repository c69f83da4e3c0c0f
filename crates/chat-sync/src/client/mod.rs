//! Chat client: store, history, live connection and send path.

mod config;
pub mod connection;
pub mod dispatcher;
pub mod history;
pub mod http_store;
pub mod hub;
pub mod merge;
pub mod retry;
mod session;
pub mod store;
mod subscription;
mod utils;

pub use config::{ClientConfig, EchoPolicy, OfflineSendPolicy, SendMode, CONFIG_ENV, SERVER_URL_ENV};
pub use connection::{ConnectionManager, HandlerRegistration, InboundHandler};
pub use dispatcher::{DispatchOptions, MessageDispatcher, SendReceipt, SendWarning};
pub use history::{HistoryLoader, LoadState};
pub use http_store::HttpHistoryStore;
pub use hub::{HubLink, HubTransport};
pub use merge::{MergeOutcome, PendingEcho};
pub use retry::{ReconnectConfig, RetryDecision, RetryState};
pub use session::ChatSession;
pub use store::{MessageStore, StoreEvent, StoreHandle, StoreSubscription, PENDING_ECHO_TTL};
pub use subscription::{HeartbeatConfig, LiveSubscription};
pub use utils::*;
