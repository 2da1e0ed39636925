//! Adapters implementing the ports.

pub mod memory;
pub mod store;
pub mod websocket;

pub use memory::{ConnectBehavior, MemoryConnector, MemoryListener, MemoryPeer};
pub use store::{FileSessionStore, MemorySessionStore};
pub use websocket::WebSocketConnector;
