//! Ports: the seams between the client core and its I/O.

pub mod store;
pub mod transport;

pub use store::{PersistedSession, SessionStore, StoreError, StoredValue};
pub use transport::{Connector, Frame, FrameSink, FrameStream, TransportHandle};
