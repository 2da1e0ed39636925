//! Transport port: how the connection manager obtains a frame sink/stream.

use crate::domain::error::TransportError;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Frame exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON text frame
    Text(String),
    /// Close frame with optional reason
    Close(Option<String>),
}

/// Outbound half of an open transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of an open transport. Ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open transport session.
pub struct TransportHandle {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl TransportHandle {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Establishes transport sessions to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new session to `url`.
    async fn connect(&self, url: &str) -> Result<TransportHandle, TransportError>;
}
