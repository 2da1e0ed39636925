//! WebSocket transport over `tokio-tungstenite`.

use crate::domain::error::TransportError;
use crate::ports::transport::{Connector, Frame, TransportHandle};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Connector that opens a WebSocket per session.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportHandle, TransportError> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url = url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|msg| future::ready(from_message(msg)));

        Ok(TransportHandle::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close(reason) => Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.unwrap_or_default().into(),
        })),
    }
}

fn from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
            frame.map(|f| f.reason.to_string()),
        ))),
        Ok(Message::Binary(bytes)) => {
            warn!(len = bytes.len(), "Ignoring binary frame");
            None
        }
        // Ping/pong are answered by tungstenite itself
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::Io(e.to_string()))),
    }
}
