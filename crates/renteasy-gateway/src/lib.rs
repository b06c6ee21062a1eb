pub mod connection;
pub mod hub;

pub use connection::{GatewayState, SessionState, ws_chat};
pub use hub::{Hub, LiveSession, SessionHandle};
