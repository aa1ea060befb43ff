pub mod channel;
pub mod local;
pub mod registry;
pub mod types;
pub mod websocket;

pub use channel::{RelayChannel, RelayEvent};
pub use local::{LocalRelayClient, LocalRelayHub};
pub use registry::SessionRegistry;
pub use types::RelayMessage;
pub use websocket::WebSocketRelay;
