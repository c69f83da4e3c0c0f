pub mod message;
pub mod request;
pub mod response;
pub mod session;
pub mod state;

pub use message::{receive_stamp, send_stamp, InboundMessage, Message};
pub use request::StorageRequest;
pub use response::StorageResponse;
pub use session::SessionIdentity;
pub use state::ConnectionState;
