// deconz-api: Async Rust client for the deCONZ gateway (REST + push WebSocket)

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod transport;
pub mod websocket;

pub use client::GatewayClient;
pub use error::Error;
pub use models::{FullState, PushMessage, RawResource};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{SocketConfig, SocketEvent, SocketHandle, SocketState};
