//! Connection lifecycle: the single transport session and its reconnect policy.

pub mod manager;
pub mod state;

pub use manager::{ConnectionManager, ConnectionStats};
pub use state::ConnectionState;
