//! Connection Manager - owns the single transport session and its lifecycle.
//!
//! Each session runs in a driver task that selects over inbound frames,
//! queued outbound frames and a shutdown signal. Inbound text frames are
//! decoded into envelopes and handed to the correlation table.
//!
//! Every session carries a generation number. State changes are applied under
//! the `active` lock and only by the current generation, so a retired driver
//! can never overwrite the state of its successor.

use crate::connection::state::{CloseKind, ConnectionState};
use crate::domain::config::ConnectionConfig;
use crate::domain::envelope::InboundEnvelope;
use crate::domain::error::{ClientError, ClientResult, TransportError};
use crate::domain::pending::CorrelationTable;
use crate::ports::transport::{Connector, Frame, TransportHandle};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on sending the close frame during a clean shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest slice of an undecodable frame included in logs.
const MAX_LOGGED_FRAME: usize = 256;

/// Connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Transport sessions attempted
    pub connect_attempts: AtomicU64,
    /// Sessions that reached `Open`
    pub opens: AtomicU64,
    /// Reconnects scheduled after an unclean close
    pub reconnects_scheduled: AtomicU64,
    /// Text frames written to the transport
    pub frames_sent: AtomicU64,
    /// Text frames read from the transport
    pub frames_received: AtomicU64,
    /// Inbound frames that were not valid envelopes
    pub decode_failures: AtomicU64,
}

/// Handle to the running session.
struct ActiveConnection {
    generation: u64,
    outbound: mpsc::Sender<Frame>,
    shutdown: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

struct Shared {
    url: String,
    connector: Arc<dyn Connector>,
    table: Arc<CorrelationTable>,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    outbound_buffer: usize,
    state_tx: watch::Sender<ConnectionState>,
    active: Mutex<Option<ActiveConnection>>,
    next_generation: AtomicU64,
    stats: ConnectionStats,
}

/// Owns the transport connection and applies the reconnect policy.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager in the `Closed` state. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn new(
        config: &ConnectionConfig,
        connector: Arc<dyn Connector>,
        table: Arc<CorrelationTable>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            shared: Arc::new(Shared {
                url: config.url.clone(),
                connector,
                table,
                reconnect_delay: config.reconnect_delay(),
                connect_timeout: config.connect_timeout(),
                outbound_buffer: config.outbound_buffer.max(1),
                state_tx,
                active: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                stats: ConnectionStats::default(),
            }),
        }
    }

    /// Start a session unless one is already open or connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut active = self.shared.active.lock();
        let state = *self.shared.state_tx.borrow();
        if active.is_some() && state != ConnectionState::Closed {
            debug!(state = %state, "connect() ignored, session already {}", state);
            return;
        }
        Shared::start(&self.shared, &mut active);
    }

    /// Close the session without scheduling a reconnect.
    ///
    /// Pending requests are left to their own timers. Safe to call when
    /// nothing is connected.
    pub fn disconnect(&self) {
        let mut active = self.shared.active.lock();
        let Some(mut conn) = active.take() else {
            return;
        };
        // Detach first: the driver sees the shutdown signal and exits cleanly.
        if let Some(shutdown) = conn.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.shared.state_tx.send_replace(ConnectionState::Closed);
        info!(url = %self.shared.url, generation = conn.generation, "Disconnected");
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Queue a text frame on the open session.
    pub async fn send_text(&self, text: String) -> ClientResult<()> {
        let outbound = {
            let active = self.shared.active.lock();
            if !self.state().is_open() {
                return Err(ClientError::NotConnected);
            }
            active
                .as_ref()
                .map(|conn| conn.outbound.clone())
                .ok_or(ClientError::NotConnected)?
        };

        outbound
            .send(Frame::Text(text))
            .await
            .map_err(|_| ClientError::Transport(TransportError::Closed))
    }

    /// Serialize `message` and queue it on the open session.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> ClientResult<()> {
        let text = serde_json::to_string(message)?;
        self.send_text(text).await
    }

    /// Endpoint this manager connects to.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Get statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    /// Replace the active session with a fresh one. Caller holds the lock.
    fn start(shared: &Arc<Self>, active: &mut Option<ActiveConnection>) {
        let generation = shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(shared.outbound_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        shared.state_tx.send_replace(ConnectionState::Connecting);
        info!(url = %shared.url, generation = generation, "Connecting");

        let task = tokio::spawn(drive(shared.clone(), generation, outbound_rx, shutdown_rx));
        *active = Some(ActiveConnection {
            generation,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            _task: task,
        });
    }

    /// Apply a state change if `generation` is still the active session.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some(conn) if conn.generation == generation => {
                self.state_tx.send_replace(state);
                true
            }
            _ => false,
        }
    }

    /// Scheduled reconnect; skipped if the session was replaced or released.
    fn reconnect(shared: &Arc<Self>, generation: u64) {
        let mut active = shared.active.lock();
        match active.as_ref() {
            Some(conn) if conn.generation == generation => {
                info!(url = %shared.url, "Reconnecting");
                Shared::start(shared, &mut active);
            }
            _ => debug!(generation = generation, "Scheduled reconnect superseded"),
        }
    }

    fn handle_text(&self, text: &str) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        match InboundEnvelope::decode(text) {
            Ok(envelope) => {
                debug!(
                    message_id = %envelope.message_id,
                    success = envelope.success,
                    "Envelope received"
                );
                self.table.resolve_envelope(envelope);
            }
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    raw = truncate(text, MAX_LOGGED_FRAME),
                    "Dropping undecodable frame"
                );
            }
        }
    }
}

/// Driver for one session generation.
async fn drive(
    shared: Arc<Shared>,
    generation: u64,
    mut outbound_rx: mpsc::Receiver<Frame>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    shared.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);

    let connect =
        tokio::time::timeout(shared.connect_timeout, shared.connector.connect(&shared.url));
    let attempt = tokio::select! {
        result = connect => result.unwrap_or_else(|_| {
            Err(TransportError::Connect(format!(
                "timed out after {}ms",
                shared.connect_timeout.as_millis()
            )))
        }),
        _ = &mut shutdown_rx => {
            debug!(generation = generation, "Connect abandoned by disconnect");
            return;
        }
    };

    let close = match attempt {
        Ok(handle) => {
            if !shared.transition(generation, ConnectionState::Open) {
                return;
            }
            shared.stats.opens.fetch_add(1, Ordering::Relaxed);
            info!(url = %shared.url, generation = generation, "Connection open");
            run_session(&shared, handle, &mut outbound_rx, &mut shutdown_rx).await
        }
        Err(e) => {
            error!(url = %shared.url, error = %e, "Connection attempt failed");
            CloseKind::Unclean
        }
    };

    if close == CloseKind::Clean {
        debug!(generation = generation, "Session closed cleanly");
        return;
    }

    if !shared.transition(generation, ConnectionState::Closed) {
        return;
    }
    shared.stats.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    warn!(
        url = %shared.url,
        delay_ms = shared.reconnect_delay.as_millis() as u64,
        "Connection closed unexpectedly, reconnecting"
    );

    // Flat delay; a disconnect() during the wait cancels the attempt.
    tokio::select! {
        _ = tokio::time::sleep(shared.reconnect_delay) => Shared::reconnect(&shared, generation),
        _ = &mut shutdown_rx => {
            debug!(generation = generation, "Reconnect cancelled");
        }
    }
}

async fn run_session(
    shared: &Shared,
    handle: TransportHandle,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> CloseKind {
    let TransportHandle {
        mut sink,
        mut stream,
    } = handle;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                close_sink(&mut sink).await;
                return CloseKind::Clean;
            }
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        error!(error = %e, "Transport write failed");
                        return CloseKind::Unclean;
                    }
                    shared.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                // Handle released by disconnect()
                None => {
                    close_sink(&mut sink).await;
                    return CloseKind::Clean;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Frame::Text(text))) => shared.handle_text(&text),
                Some(Ok(Frame::Close(reason))) => {
                    info!(reason = reason.as_deref().unwrap_or(""), "Peer closed connection");
                    return CloseKind::Unclean;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Transport error");
                    return CloseKind::Unclean;
                }
                None => {
                    warn!("Transport stream ended");
                    return CloseKind::Unclean;
                }
            },
        }
    }
}

async fn close_sink(sink: &mut crate::ports::transport::FrameSink) {
    let close = async {
        sink.send(Frame::Close(None)).await?;
        sink.close().await
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
        Err(_) => debug!("Close frame timed out"),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
