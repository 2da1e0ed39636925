//! In-process transport.
//!
//! Every successful `connect()` hands a [`MemoryPeer`] to the paired
//! [`MemoryListener`], which plays the server side: it can push frames to the
//! client, read what the client sent, close, or simply be dropped to simulate
//! an abrupt disconnect.

use crate::domain::envelope::InboundEnvelope;
use crate::domain::error::TransportError;
use crate::ports::transport::{Connector, Frame, TransportHandle};
use async_trait::async_trait;
use futures::channel::mpsc as chan;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the next `connect()` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Open a session and hand the peer to the listener
    Accept,
    /// Fail immediately
    Refuse,
    /// Never complete
    Hang,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<ConnectBehavior>,
    fallback: Option<ConnectBehavior>,
    attempts: Vec<Instant>,
}

/// Connector backed by in-memory channels.
pub struct MemoryConnector {
    script: Mutex<Script>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the listener receiving its peers.
    pub fn new() -> (Arc<Self>, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(Script::default()),
            accepted: tx,
        });
        (connector, MemoryListener { accepted: rx })
    }

    /// Queue the behaviour of the next unscripted attempt.
    pub fn push_behavior(&self, behavior: ConnectBehavior) {
        self.script.lock().queued.push_back(behavior);
    }

    /// Behaviour once the queue is empty (default: `Accept`).
    pub fn set_default_behavior(&self, behavior: ConnectBehavior) {
        self.script.lock().fallback = Some(behavior);
    }

    /// Number of `connect()` calls so far.
    pub fn attempts(&self) -> usize {
        self.script.lock().attempts.len()
    }

    /// When each `connect()` call happened.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.script.lock().attempts.clone()
    }

    fn next_behavior(&self) -> ConnectBehavior {
        let mut script = self.script.lock();
        script.attempts.push(Instant::now());
        script
            .queued
            .pop_front()
            .or(script.fallback)
            .unwrap_or(ConnectBehavior::Accept)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportHandle, TransportError> {
        match self.next_behavior() {
            ConnectBehavior::Refuse => {
                return Err(TransportError::Connect(format!("{url}: connection refused")))
            }
            ConnectBehavior::Hang => futures::future::pending::<()>().await,
            ConnectBehavior::Accept => {}
        }

        let (to_client, client_inbound) = chan::unbounded::<Result<Frame, TransportError>>();
        let (client_outbound, from_client) = chan::unbounded::<Frame>();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Connect(format!("{url}: listener gone")))?;

        let sink = client_outbound.sink_map_err(|_| TransportError::Closed);
        Ok(TransportHandle::new(Box::pin(sink), Box::pin(client_inbound)))
    }
}

/// Receives the server side of each accepted session.
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next accepted session.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

/// Server side of one in-memory session. Dropping it ends the client's
/// inbound stream.
pub struct MemoryPeer {
    url: String,
    to_client: chan::UnboundedSender<Result<Frame, TransportError>>,
    from_client: chan::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a raw text frame. Returns `false` if the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .unbounded_send(Ok(Frame::Text(text.into())))
            .is_ok()
    }

    /// Push an encoded envelope.
    pub fn send_envelope(&self, envelope: &InboundEnvelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Push a close frame.
    pub fn close(&self, reason: Option<&str>) -> bool {
        self.to_client
            .unbounded_send(Ok(Frame::Close(reason.map(str::to_string))))
            .is_ok()
    }

    /// Inject a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Next frame written by the client.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }
}
