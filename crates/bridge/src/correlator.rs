//! Request/response correlation over the peer channel.
//!
//! Turns a fire-and-forget message send into an awaitable call with bounded
//! wait time. Ids come from a monotone counter and are never reused; replies
//! are matched by id, not by arrival order, so out-of-order replies resolve
//! exactly the call they belong to.
//!
//! # Timer discipline
//!
//! Deadlines live in one shared min-heap swept by a single expiry task
//! ([`Correlator::run_expiry`]); an arbitrarily large number of concurrent
//! calls never creates more than one sleeping timer. A popped deadline whose
//! call is already settled is a silent no-op.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::debug;
use webmcp_protocol::{CallId, PeerMessage};

use crate::error::{Error, Result};
use crate::transport::PeerHandle;

/// Why every pending call is being failed at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The peer connection dropped.
    Disconnected,
    /// A newer peer connection replaced the one serving these calls.
    Superseded,
    /// The bridge is going away.
    ShuttingDown,
}

impl CancelReason {
    fn to_error(self) -> Error {
        match self {
            CancelReason::Disconnected => Error::PeerDisconnected,
            CancelReason::Superseded => Error::PeerSuperseded,
            CancelReason::ShuttingDown => Error::ShuttingDown,
        }
    }
}

struct PendingCall {
    operation: String,
    timeout_ms: u64,
    /// Peer generation the call was dispatched against. A supersede fails
    /// older generations only; calls already riding the new connection keep
    /// their entries.
    generation: u64,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<CallId, PendingCall>,
    /// Min-heap of (deadline, id). May hold stale entries for settled calls;
    /// the sweep skips anything no longer in `calls`.
    deadlines: BinaryHeap<Reverse<(Instant, CallId)>>,
}

/// Tracks in-flight request/response pairs across the peer channel.
pub struct Correlator {
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
    /// Woken whenever the earliest deadline may have moved.
    deadline_changed: Notify,
    closed: AtomicBool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
            deadline_changed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Send `build(id)` to the current peer and await the correlated reply.
    ///
    /// Fails immediately with [`Error::PeerUnavailable`] when no peer is
    /// connected; no pending entry or timer is created in that case. On
    /// timeout the call fails with [`Error::DeadlineExceeded`] carrying
    /// `operation` for diagnostics. Dropping the returned future removes the
    /// pending entry, so an abandoned caller cannot leak table slots.
    pub async fn dispatch(
        &self,
        peer: &PeerHandle,
        operation: &str,
        timeout: Duration,
        build: impl FnOnce(CallId) -> PeerMessage,
    ) -> Result<Value> {
        let (sender, generation) = peer
            .sender_with_generation()
            .ok_or(Error::PeerUnavailable)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table.lock();
            table.calls.insert(
                id,
                PendingCall {
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                    generation,
                    tx,
                },
            );
            table.deadlines.push(Reverse((deadline, id)));
        }
        // Wake the expiry task so it re-arms against the new earliest deadline.
        self.deadline_changed.notify_one();

        if sender.send(build(id)).is_err() {
            // Writer task went away between the sender lookup and the send.
            self.table.lock().calls.remove(&id);
            return Err(if peer.generation() > generation {
                Error::PeerSuperseded
            } else {
                Error::PeerUnavailable
            });
        }

        debug!(target: "webmcp.correlator", id, operation, "call dispatched");

        let mut guard = SettleGuard { correlator: self, id, armed: true };
        let outcome = rx.await;
        guard.armed = false;
        drop(guard);

        match outcome {
            Ok(result) => result,
            // The sender half only disappears wholesale on shutdown.
            Err(_) => Err(Error::ShuttingDown),
        }
    }

    /// Settle the pending call `id`. Unknown or already-settled ids are
    /// logged and dropped; a duplicate or stale reply is not an error.
    pub fn resolve(&self, id: CallId, outcome: Result<Value>) {
        let call = self.table.lock().calls.remove(&id);
        match call {
            Some(call) => {
                debug!(target: "webmcp.correlator", id, operation = %call.operation, "call settled");
                let _ = call.tx.send(outcome);
            }
            None => {
                debug!(target: "webmcp.correlator", id, "reply for unknown or settled call, dropped");
            }
        }
    }

    /// Fail pending calls dispatched against peer generation `generation`
    /// or older. Calls riding a newer connection are untouched, so a
    /// takeover cannot spuriously fail work already handed to its successor.
    pub fn cancel_generation(&self, generation: u64, reason: CancelReason) {
        let calls: Vec<PendingCall> = {
            let mut table = self.table.lock();
            let stale: Vec<CallId> = table
                .calls
                .iter()
                .filter(|(_, call)| call.generation <= generation)
                .map(|(&id, _)| id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| table.calls.remove(&id))
                .collect()
        };
        if !calls.is_empty() {
            debug!(target: "webmcp.correlator", count = calls.len(), generation, ?reason, "failing pending calls");
        }
        for call in calls {
            let _ = call.tx.send(Err(reason.to_error()));
        }
    }

    /// Fail every pending call with `reason` and clear the table.
    ///
    /// Invoked on shutdown so no caller waits out its full timeout.
    pub fn cancel_all(&self, reason: CancelReason) {
        if reason == CancelReason::ShuttingDown {
            self.closed.store(true, Ordering::Release);
            self.deadline_changed.notify_one();
        }
        let calls: Vec<PendingCall> = {
            let mut table = self.table.lock();
            table.deadlines.clear();
            table.calls.drain().map(|(_, call)| call).collect()
        };
        if !calls.is_empty() {
            debug!(target: "webmcp.correlator", count = calls.len(), ?reason, "failing pending calls");
        }
        for call in calls {
            let _ = call.tx.send(Err(reason.to_error()));
        }
    }

    /// Number of calls currently in flight.
    pub fn pending(&self) -> usize {
        self.table.lock().calls.len()
    }

    /// Single expiry task enforcing all deadlines. Spawned once per bridge;
    /// exits after `cancel_all(ShuttingDown)`.
    pub async fn run_expiry(self: Arc<Self>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            match self.earliest_deadline() {
                None => self.deadline_changed.notified().await,
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => self.expire_due(),
                        _ = self.deadline_changed.notified() => {}
                    }
                }
            }
        }
    }

    /// Earliest deadline still backed by a live call, discarding stale heap
    /// heads along the way.
    fn earliest_deadline(&self) -> Option<Instant> {
        let mut table = self.table.lock();
        while let Some(&Reverse((at, id))) = table.deadlines.peek() {
            if table.calls.contains_key(&id) {
                return Some(at);
            }
            table.deadlines.pop();
        }
        None
    }

    fn expire_due(&self) {
        let now = Instant::now();
        let mut expired: Vec<(CallId, PendingCall)> = Vec::new();
        {
            let mut table = self.table.lock();
            while let Some(&Reverse((at, id))) = table.deadlines.peek() {
                if at > now {
                    break;
                }
                table.deadlines.pop();
                if let Some(call) = table.calls.remove(&id) {
                    expired.push((id, call));
                }
            }
        }
        for (id, call) in expired {
            debug!(target: "webmcp.correlator", id, operation = %call.operation, "call timed out");
            let _ = call.tx.send(Err(Error::DeadlineExceeded {
                operation: call.operation.clone(),
                timeout_ms: call.timeout_ms,
            }));
        }
    }
}

/// Removes the pending entry when a caller's future is dropped mid-wait.
struct SettleGuard<'a> {
    correlator: &'a Correlator,
    id: CallId,
    armed: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.correlator.table.lock().calls.remove(&self.id).is_some() {
            debug!(target: "webmcp.correlator", id = self.id, "caller dropped, call abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn harness() -> (Arc<Correlator>, PeerHandle, mpsc::UnboundedReceiver<PeerMessage>) {
        let correlator = Arc::new(Correlator::new());
        let peer = PeerHandle::new();
        let (tx, rx) = mpsc::unbounded_channel();
        peer.install(tx);
        (correlator, peer, rx)
    }

    fn invoke_message(id: CallId, operation: &str) -> PeerMessage {
        PeerMessage::Invoke {
            id,
            operation_name: operation.to_string(),
            args: json!({}),
            site_id: "a.example".to_string(),
        }
    }

    fn sent_id(message: PeerMessage) -> CallId {
        match message {
            PeerMessage::Invoke { id, .. } => id,
            other => panic!("expected invoke, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_peer_fails_immediately_without_pending_entry() {
        let correlator = Correlator::new();
        let peer = PeerHandle::new();

        let result = correlator
            .dispatch(&peer, "search", Duration::from_secs(5), |id| {
                invoke_message(id, "search")
            })
            .await;

        assert!(matches!(result, Err(Error::PeerUnavailable)));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn reply_resolves_matching_call() {
        let (correlator, peer, mut rx) = harness();

        let call = correlator.dispatch(&peer, "search", Duration::from_secs(5), |id| {
            invoke_message(id, "search")
        });
        let responder = {
            let correlator = Arc::clone(&correlator);
            async move {
                let id = sent_id(rx.recv().await.unwrap());
                correlator.resolve(id, Ok(json!({ "hits": 3 })));
            }
        };

        let (result, ()) = tokio::join!(call, responder);
        assert_eq!(result.unwrap()["hits"], 3);
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn out_of_order_replies_resolve_their_own_callers() {
        let (correlator, peer, mut rx) = harness();

        let first = correlator.dispatch(&peer, "first", Duration::from_secs(5), |id| {
            invoke_message(id, "first")
        });
        let second = correlator.dispatch(&peer, "second", Duration::from_secs(5), |id| {
            invoke_message(id, "second")
        });
        let responder = {
            let correlator = Arc::clone(&correlator);
            async move {
                let id_first = sent_id(rx.recv().await.unwrap());
                let id_second = sent_id(rx.recv().await.unwrap());
                // Reply in reverse order.
                correlator.resolve(id_second, Ok(json!("second result")));
                correlator.resolve(id_first, Ok(json!("first result")));
            }
        };

        let (first, second, ()) = tokio::join!(first, second, responder);
        assert_eq!(first.unwrap(), json!("first result"));
        assert_eq!(second.unwrap(), json!("second result"));
    }

    #[tokio::test]
    async fn stale_reply_is_dropped() {
        let (correlator, _peer, _rx) = harness();
        // Never issued; must not panic or create state.
        correlator.resolve(999, Ok(json!(null)));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_no_earlier_than_timeout() {
        let (correlator, peer, _rx) = harness();
        tokio::spawn(Arc::clone(&correlator).run_expiry());

        let started = Instant::now();
        let result = correlator
            .dispatch(&peer, "slow", Duration::from_millis(500), |id| {
                invoke_message(id, "slow")
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(correlator.pending(), 0);
        assert!(err.to_string().contains("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_after_timeout_is_a_noop() {
        let (correlator, peer, mut rx) = harness();
        tokio::spawn(Arc::clone(&correlator).run_expiry());

        let result = correlator
            .dispatch(&peer, "slow", Duration::from_millis(100), |id| {
                invoke_message(id, "slow")
            })
            .await;
        assert!(result.unwrap_err().is_timeout());

        let id = sent_id(rx.recv().await.unwrap());
        correlator.resolve(id, Ok(json!("late")));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_only_fires_due_calls() {
        let (correlator, peer, _rx) = harness();
        tokio::spawn(Arc::clone(&correlator).run_expiry());

        let short = correlator.dispatch(&peer, "short", Duration::from_millis(100), |id| {
            invoke_message(id, "short")
        });
        let long = {
            let correlator = Arc::clone(&correlator);
            let peer = peer.clone();
            async move {
                correlator
                    .dispatch(&peer, "long", Duration::from_secs(60), |id| {
                        invoke_message(id, "long")
                    })
                    .await
            }
        };
        let long = tokio::spawn(long);

        assert!(short.await.unwrap_err().is_timeout());
        // The long call is still pending after the short one expired.
        tokio::task::yield_now().await;
        assert_eq!(correlator.pending(), 1);
        long.abort();
    }

    #[tokio::test]
    async fn cancel_all_fails_every_pending_call() {
        let (correlator, peer, _rx) = harness();

        let first = correlator.dispatch(&peer, "first", Duration::from_secs(60), |id| {
            invoke_message(id, "first")
        });
        let second = correlator.dispatch(&peer, "second", Duration::from_secs(60), |id| {
            invoke_message(id, "second")
        });
        let canceller = {
            let correlator = Arc::clone(&correlator);
            async move {
                tokio::task::yield_now().await;
                correlator.cancel_all(CancelReason::Superseded);
            }
        };

        let (first, second, ()) = tokio::join!(first, second, canceller);
        assert!(matches!(first, Err(Error::PeerSuperseded)));
        assert!(matches!(second, Err(Error::PeerSuperseded)));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn supersede_spares_calls_on_the_new_connection() {
        let correlator = Arc::new(Correlator::new());
        let peer = PeerHandle::new();

        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        peer.install(old_tx);
        let stranded = {
            let correlator = Arc::clone(&correlator);
            let peer = peer.clone();
            tokio::spawn(async move {
                correlator
                    .dispatch(&peer, "old", Duration::from_secs(60), |id| {
                        invoke_message(id, "old")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Takeover: a call dispatched against the fresh connection before
        // the cancel pass runs must keep its pending entry.
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let (_displaced, generation) = peer.install(new_tx);
        let fresh = {
            let correlator = Arc::clone(&correlator);
            let peer = peer.clone();
            tokio::spawn(async move {
                correlator
                    .dispatch(&peer, "fresh", Duration::from_secs(60), |id| {
                        invoke_message(id, "fresh")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        correlator.cancel_generation(generation - 1, CancelReason::Superseded);

        let err = stranded.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::PeerSuperseded));
        assert_eq!(correlator.pending(), 1);

        let id = sent_id(new_rx.recv().await.unwrap());
        correlator.resolve(id, Ok(json!("served by successor")));
        assert_eq!(fresh.await.unwrap().unwrap(), json!("served by successor"));
    }

    #[tokio::test]
    async fn disconnect_cleanup_is_inclusive_and_idempotent() {
        let (correlator, peer, _rx) = harness();

        let call = {
            let correlator = Arc::clone(&correlator);
            let peer = peer.clone();
            tokio::spawn(async move {
                correlator
                    .dispatch(&peer, "search", Duration::from_secs(60), |id| {
                        invoke_message(id, "search")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(correlator.pending(), 1);

        // The dying connection cancels its own generation, bound inclusive.
        correlator.cancel_generation(1, CancelReason::Disconnected);
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::PeerDisconnected));
        assert_eq!(correlator.pending(), 0);

        // A second pass over the same generation has nothing left to fail.
        correlator.cancel_generation(1, CancelReason::Disconnected);
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn concurrent_dispatches_all_resolve() {
        let (correlator, peer, mut rx) = harness();

        // Echo every id back in reverse batches of whatever arrived.
        let responder = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(message) = rx.recv().await {
                    ids.push(sent_id(message));
                    if ids.len() == 32 {
                        break;
                    }
                }
                for id in ids.into_iter().rev() {
                    correlator.resolve(id, Ok(json!(id)));
                }
            })
        };

        let calls: Vec<_> = (0..32).map(|i| {
            let correlator = Arc::clone(&correlator);
            let peer = peer.clone();
            tokio::spawn(async move {
                correlator
                    .dispatch(&peer, &format!("op{i}"), Duration::from_secs(5), |id| {
                        invoke_message(id, "op")
                    })
                    .await
                    .unwrap()
            })
        }).collect();
        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.unwrap());
        }

        responder.await.unwrap();
        // Each caller got a result; ids are unique, so values are distinct.
        let mut seen: Vec<u64> = results.iter().map(|r| r.as_u64().unwrap()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 32);
        assert_eq!(correlator.pending(), 0);
    }
}
