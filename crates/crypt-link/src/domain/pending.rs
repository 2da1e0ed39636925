//! Correlation Table - maps message ids to callers awaiting a reply.
//!
//! Flow:
//! 1. Caller registers a message id and receives a oneshot receiver
//! 2. Registration starts a per-request timer
//! 3. The connection driver decodes an inbound envelope and calls `resolve()`
//! 4. Otherwise the timer fires and calls `expire()`
//!
//! `DashMap::remove` is the arbitration point between `resolve()` and
//! `expire()`: whichever removes the entry completes it, the other is a no-op.

use crate::domain::correlation::MessageId;
use crate::domain::envelope::InboundEnvelope;
use crate::domain::error::{ClientError, ClientResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome delivered to the awaiting caller.
pub type Completion = ClientResult<serde_json::Value>;

/// Receiver handed out by [`CorrelationTable::register`].
pub type CompletionReceiver = oneshot::Receiver<Completion>;

/// Message used when a failure envelope carries no error text.
const UNSPECIFIED_REMOTE_ERROR: &str = "Request failed";

/// One outstanding caller expectation.
struct PendingRequest {
    /// Success and failure continuations, as a single completion channel
    sender: oneshot::Sender<Completion>,
    /// When the request was registered
    created_at: Instant,
    /// Deadline for this request
    timeout: Duration,
    /// Distinguishes this registration from a later one reusing the id
    seq: u64,
    /// Timer task that calls `expire()`
    timer: Option<JoinHandle<()>>,
}

/// Counters for the correlation table.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Requests resolved by a success envelope
    pub total_completed: AtomicU64,
    /// Requests resolved by a failure envelope
    pub total_failed: AtomicU64,
    /// Requests expired by their timer
    pub total_timeouts: AtomicU64,
    /// Envelopes with no matching pending request
    pub total_orphaned: AtomicU64,
    /// Completions whose receiver was already dropped
    pub total_abandoned: AtomicU64,
    /// Registrations withdrawn by the caller
    pub total_cancelled: AtomicU64,
}

/// Correlation table shared by the connection driver and the callers.
pub struct CorrelationTable {
    pending: DashMap<MessageId, PendingRequest>,
    next_seq: AtomicU64,
    stats: PendingStats,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            next_seq: AtomicU64::new(0),
            stats: PendingStats::default(),
        })
    }

    /// Register a pending request and start its timer.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`ClientError::DuplicateMessageId`] if `message_id` is already pending;
    /// the existing entry is left untouched.
    pub fn register(
        self: &Arc<Self>,
        message_id: MessageId,
        timeout: Duration,
    ) -> ClientResult<CompletionReceiver> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(message_id.clone()) {
            Entry::Occupied(_) => {
                warn!(message_id = %message_id, "Duplicate message id registration");
                return Err(ClientError::DuplicateMessageId(message_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    sender: tx,
                    created_at: Instant::now(),
                    timeout,
                    seq,
                    timer: None,
                });
            }
        }

        // Entry is inserted before the timer exists, so an immediate expiry
        // always finds it. The timer only ever touches registration `seq`.
        let timer = tokio::spawn(expire_after(
            Arc::downgrade(self),
            message_id.clone(),
            seq,
            timeout,
        ));
        match self.pending.get_mut(&message_id) {
            Some(mut entry) if entry.seq == seq => entry.timer = Some(timer),
            _ => timer.abort(),
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %message_id,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        Ok(rx)
    }

    /// Resolve a pending request from a decoded reply.
    ///
    /// Returns `true` if a pending request was found. Unknown ids (orphaned
    /// replies) are dropped without error.
    pub fn resolve(
        &self,
        message_id: &str,
        success: bool,
        payload: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let Some((id, pending)) = self.pending.remove(message_id) else {
            self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = message_id, "Dropping orphaned reply");
            return false;
        };

        if let Some(timer) = &pending.timer {
            timer.abort();
        }

        let response_time = pending.created_at.elapsed();
        let outcome = if success {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            Ok(payload.unwrap_or(serde_json::Value::Null))
        } else {
            self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
            Err(ClientError::Remote(
                error.unwrap_or_else(|| UNSPECIFIED_REMOTE_ERROR.to_string()),
            ))
        };

        debug!(
            message_id = %id,
            success = success,
            response_time_ms = response_time.as_millis() as u64,
            "Resolved pending request"
        );
        self.deliver(&id, pending.sender, outcome);
        true
    }

    /// Resolve from a decoded envelope.
    pub fn resolve_envelope(&self, envelope: InboundEnvelope) -> bool {
        self.resolve(
            envelope.message_id.as_str(),
            envelope.success,
            envelope.data,
            envelope.error,
        )
    }

    /// Expire a pending request with a timeout error.
    ///
    /// No-op returning `false` if the request was already resolved.
    pub fn expire(&self, message_id: &str) -> bool {
        match self.pending.remove(message_id) {
            Some((id, pending)) => self.complete_expired(id, pending),
            None => false,
        }
    }

    /// Timer path: expire only if `message_id` still belongs to registration
    /// `seq`.
    fn expire_registration(&self, message_id: &str, seq: u64) -> bool {
        match self.pending.remove_if(message_id, |_, pending| pending.seq == seq) {
            Some((id, pending)) => self.complete_expired(id, pending),
            None => false,
        }
    }

    fn complete_expired(&self, id: MessageId, pending: PendingRequest) -> bool {
        let timeout_ms = pending.timeout.as_millis() as u64;
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            message_id = %id,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            timeout_ms = timeout_ms,
            "Pending request timed out"
        );

        let err = ClientError::Timeout {
            message_id: id.clone(),
            timeout_ms,
        };
        self.deliver(&id, pending.sender, Err(err));
        true
    }

    /// Withdraw a registration without completing it.
    ///
    /// Used when the request could not be transmitted; the caller reports the
    /// send error itself.
    pub fn cancel(&self, message_id: &str) -> bool {
        match self.pending.remove(message_id) {
            Some((_, pending)) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Check if a message id is pending
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    /// Number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    fn deliver(&self, message_id: &MessageId, sender: oneshot::Sender<Completion>, outcome: Completion) {
        if sender.send(outcome).is_err() {
            self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %message_id, "Pending request receiver dropped");
        }
    }
}

async fn expire_after(
    table: Weak<CorrelationTable>,
    message_id: MessageId,
    seq: u64,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;
    if let Some(table) = table.upgrade() {
        table.expire_registration(message_id.as_str(), seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_register_and_resolve() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("req-2"), Duration::from_secs(30)).unwrap();
        assert!(table.is_pending("req-2"));
        assert_eq!(table.pending_count(), 1);

        assert!(table.resolve("req-2", true, Some(json!({"x": 1})), None));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"x": 1}));
        assert_eq!(table.pending_count(), 0);

        // Already terminated
        assert!(!table.resolve("req-2", true, Some(json!(2)), None));
        assert!(!table.expire("req-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_failure_carries_error() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("req-3"), Duration::from_secs(30)).unwrap();

        assert!(table.resolve("req-3", false, None, Some("bad request".into())));
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref m) if m == "bad request"));
        assert_eq!(table.stats().total_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_error_text() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("a"), Duration::from_secs(30)).unwrap();
        table.resolve("a", false, None, None);
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), UNSPECIFIED_REMOTE_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_data_is_null() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("a"), Duration::from_secs(30)).unwrap();
        table.resolve("a", true, None, None);
        assert_eq!(rx.await.unwrap().unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let table = CorrelationTable::new();
        assert!(!table.resolve("never-registered", true, Some(json!(1)), None));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.stats().total_orphaned.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_registration_rejected() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("dup"), Duration::from_secs(30)).unwrap();

        let err = table
            .register(MessageId::new("dup"), Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateMessageId(_)));

        // Original registration still resolves
        table.resolve("dup", true, Some(json!("first")), None);
        assert_eq!(rx.await.unwrap().unwrap(), json!("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_request() {
        let table = CorrelationTable::new();
        let started = tokio::time::Instant::now();
        let rx = table.register(MessageId::new("req-1"), Duration::from_millis(1000)).unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(matches!(
            err,
            ClientError::Timeout { ref message_id, timeout_ms: 1000 } if message_id.as_str() == "req-1"
        ));
        assert!(!table.is_pending("req-1"));
        assert_eq!(table.stats().total_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_then_expire_only_one_wins() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("race"), Duration::from_millis(10)).unwrap();

        let resolved = table.resolve("race", true, Some(json!(1)), None);
        let expired = table.expire("race");
        assert!(resolved);
        assert!(!expired);
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));

        // Timer was aborted, nothing fires later
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.stats().total_timeouts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_then_resolve_only_one_wins() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("race"), Duration::from_secs(30)).unwrap();

        assert!(table.expire("race"));
        assert!(!table.resolve("race", true, Some(json!(1)), None));
        assert!(rx.await.unwrap().unwrap_err().is_timeout());
        assert_eq!(table.stats().total_completed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_and_expire() {
        let table = CorrelationTable::new();
        let mut receivers = Vec::new();
        for i in 0..200 {
            let id = MessageId::new(format!("id-{i}"));
            receivers.push(table.register(id, Duration::from_secs(60)).unwrap());
        }

        let mut tasks = Vec::new();
        for i in 0..200 {
            let t1 = table.clone();
            let t2 = table.clone();
            let id = format!("id-{i}");
            let id2 = id.clone();
            tasks.push(tokio::spawn(async move { t1.resolve(&id, true, None, None) }));
            tasks.push(tokio::spawn(async move { t2.expire(&id2) }));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 200);
        for rx in receivers {
            assert!(rx.await.is_ok());
        }
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_withdraws_without_completion() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("c"), Duration::from_secs(1)).unwrap();
        assert!(table.cancel("c"));
        assert!(!table.cancel("c"));
        // Sender dropped without a value
        assert!(rx.await.is_err());
        assert_eq!(table.stats().total_timeouts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_counts_abandoned() {
        let table = CorrelationTable::new();
        let rx = table.register(MessageId::new("gone"), Duration::from_secs(1)).unwrap();
        drop(rx);
        assert!(table.resolve("gone", true, None, None));
        assert_eq!(table.stats().total_abandoned.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_ignores_reregistered_id() {
        let table = CorrelationTable::new();
        let first = table.register(MessageId::new("reuse"), Duration::from_secs(30)).unwrap();
        let first_seq = table.pending.get("reuse").unwrap().seq;
        assert!(table.resolve("reuse", true, Some(json!(1)), None));
        assert_eq!(first.await.unwrap().unwrap(), json!(1));

        let second = table.register(MessageId::new("reuse"), Duration::from_millis(500)).unwrap();

        // A timer left over from the first registration must not fire on the second
        assert!(!table.expire_registration("reuse", first_seq));
        assert!(table.is_pending("reuse"));

        let started = tokio::time::Instant::now();
        assert!(second.await.unwrap().unwrap_err().is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(table.stats().total_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_attached_to_its_own_registration() {
        let table = CorrelationTable::new();
        let _rx = table.register(MessageId::new("t"), Duration::from_secs(30)).unwrap();
        let entry = table.pending.get("t").unwrap();
        assert!(entry.timer.is_some());
    }

    proptest! {
        #[test]
        fn prop_register_resolve_returns_payload(id in "[a-zA-Z0-9-]{1,32}", n in any::<i64>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let table = CorrelationTable::new();
                let rx = table.register(MessageId::new(id.clone()), Duration::from_secs(30)).unwrap();
                prop_assert!(table.resolve(&id, true, Some(json!(n)), None));
                prop_assert_eq!(rx.await.unwrap().unwrap(), json!(n));
                prop_assert!(!table.is_pending(&id));
                prop_assert!(!table.expire(&id));
                Ok(())
            })?;
        }

        #[test]
        fn prop_unregistered_resolve_is_noop(id in "[a-zA-Z0-9-]{1,32}") {
            let table = CorrelationTable::new();
            prop_assert!(!table.resolve(&id, false, None, Some("x".into())));
            prop_assert!(!table.expire(&id));
            prop_assert_eq!(table.pending_count(), 0);
        }
    }
}
