//! Queue collaborator port, in-memory queue, and the replay worker.
//!
//! A deferred invocation is serialized into an envelope and submitted to the
//! queue with at-least-once delivery. The worker replays the identical engine
//! steps; inline and deferred executions differ only in timing. Envelopes
//! whose replay fails are parked in the queue's dead-letter list after the
//! failure has been emitted.

use crate::error::ServiceError;
use crate::service::{Invocation, Orchestrator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Serialized invocation handed to the queue collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub invocation: Invocation,
    pub enqueued_at: DateTime<Utc>,
}

impl InvocationEnvelope {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            enqueued_at: Utc::now(),
        }
    }
}

/// Port to the external queue. Delivery is at-least-once; persistence
/// idempotence on the correlation id absorbs duplicate replays.
#[async_trait]
pub trait InvocationQueue: Send + Sync {
    async fn submit(&self, envelope: InvocationEnvelope) -> Result<(), ServiceError>;
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

struct ReadyItem {
    priority: i32,
    seq: u64,
    envelope: InvocationEnvelope,
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ReadyItem {}

impl Ord for ReadyItem {
    /// Max-heap order: higher priority first, then submission order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayedItem {
    ready_at: Instant,
    priority: i32,
    seq: u64,
    envelope: InvocationEnvelope,
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for DelayedItem {}

impl Ord for DelayedItem {
    /// Max-heap inverted: earliest ready time at the top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ready envelopes ordered by priority, with not-yet-ready envelopes held
/// aside by ready time. A delayed high-priority envelope never blocks ready
/// work.
#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<ReadyItem>,
    delayed: BinaryHeap<DelayedItem>,
}

impl QueueState {
    /// Move every delayed envelope whose time has come into the ready heap.
    fn promote(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .map(|item| item.ready_at <= now)
            .unwrap_or(false)
        {
            if let Some(item) = self.delayed.pop() {
                self.ready.push(ReadyItem {
                    priority: item.priority,
                    seq: item.seq,
                    envelope: item.envelope,
                });
            }
        }
    }

    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}

/// In-memory queue adapter with priority ordering and `run_after` readiness.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    seq: AtomicU64,
    stats: RwLock<QueueStats>,
    dead_letters: Mutex<Vec<InvocationEnvelope>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the highest-priority envelope among those whose `run_after` delay
    /// has elapsed.
    pub fn pop_ready(&self) -> Option<InvocationEnvelope> {
        let mut state = self.state.lock();
        state.promote(Instant::now());
        let item = state.ready.pop()?;
        self.stats.write().pending = state.len();
        Some(item.envelope)
    }

    /// Earliest instant at which some pending envelope is ready, if any.
    pub fn next_ready_at(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.promote(now);
        if !state.ready.is_empty() {
            return Some(now);
        }
        state.delayed.peek().map(|item| item.ready_at)
    }

    pub fn stats(&self) -> QueueStats {
        *self.stats.read()
    }

    pub fn dead_letters(&self) -> Vec<InvocationEnvelope> {
        self.dead_letters.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().len() == 0
    }

    fn record(&self, update: impl FnOnce(&mut QueueStats)) {
        update(&mut self.stats.write());
    }
}

#[async_trait]
impl InvocationQueue for InMemoryQueue {
    async fn submit(&self, envelope: InvocationEnvelope) -> Result<(), ServiceError> {
        let delay = envelope
            .invocation
            .run_after_ms
            .map(Duration::from_millis)
            .unwrap_or_default();
        let priority = envelope.invocation.priority;
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(
            identity = %envelope.invocation.identity,
            correlation_id = %envelope.invocation.correlation_id,
            priority = priority,
            run_after_ms = envelope.invocation.run_after_ms,
            "Invocation enqueued"
        );
        let mut state = self.state.lock();
        if delay.is_zero() {
            state.ready.push(ReadyItem {
                priority,
                seq,
                envelope,
            });
        } else {
            state.delayed.push(DelayedItem {
                ready_at: Instant::now() + delay,
                priority,
                seq,
                envelope,
            });
        }
        self.stats.write().pending = state.len();
        Ok(())
    }
}

/// Replays queued invocations through their owning services.
pub struct QueueWorker {
    queue: Arc<InMemoryQueue>,
    orchestrator: Arc<Orchestrator>,
}

impl QueueWorker {
    pub fn new(queue: Arc<InMemoryQueue>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            queue,
            orchestrator,
        }
    }

    /// Process envelopes until the queue is empty, waiting out `run_after`
    /// delays. Returns the number of envelopes processed.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            if let Some(envelope) = self.queue.pop_ready() {
                self.process(envelope).await;
                processed += 1;
            } else if let Some(ready_at) = self.queue.next_ready_at() {
                tokio::time::sleep_until(tokio::time::Instant::from_std(ready_at)).await;
            } else {
                break;
            }
        }
        processed
    }

    async fn process(&self, envelope: InvocationEnvelope) {
        self.queue.record(|s| s.processing += 1);
        let invocation = envelope.invocation.clone();
        let outcome = match self.orchestrator.service(&invocation.identity) {
            Ok(service) => service.replay(invocation.clone()).await.map(|_| ()),
            Err(err) => Err(err),
        };
        self.queue.record(|s| s.processing = s.processing.saturating_sub(1));
        match outcome {
            Ok(()) => {
                self.queue.record(|s| s.completed += 1);
                info!(
                    identity = %invocation.identity,
                    correlation_id = %invocation.correlation_id,
                    "Deferred invocation completed"
                );
            }
            Err(err) => {
                // Failure telemetry was emitted inside the engine; the
                // envelope now surfaces to dead-letter handling.
                self.queue.record(|s| s.failed += 1);
                self.queue.dead_letters.lock().push(envelope);
                error!(
                    identity = %invocation.identity,
                    correlation_id = %invocation.correlation_id,
                    error = %err,
                    "Deferred invocation failed; envelope dead-lettered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::prompt::RenderContext;
    use crate::types::{CorrelationId, ExecutionMode};

    fn envelope(priority: i32, run_after_ms: Option<u64>) -> InvocationEnvelope {
        InvocationEnvelope::new(Invocation {
            identity: Identity::new("app", "default", "svc").unwrap(),
            correlation_id: CorrelationId::new(),
            mode: ExecutionMode::Deferred,
            backend: "queued".to_string(),
            priority,
            run_after_ms,
            context: RenderContext::new(),
        })
    }

    #[tokio::test]
    async fn higher_priority_pops_first() {
        let queue = InMemoryQueue::new();
        queue.submit(envelope(0, None)).await.unwrap();
        queue.submit(envelope(5, None)).await.unwrap();
        queue.submit(envelope(1, None)).await.unwrap();

        let priorities: Vec<i32> = std::iter::from_fn(|| queue.pop_ready())
            .map(|e| e.invocation.priority)
            .collect();
        assert_eq!(priorities, vec![5, 1, 0]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = InMemoryQueue::new();
        let first = envelope(1, None);
        let first_id = first.invocation.correlation_id;
        queue.submit(first).await.unwrap();
        queue.submit(envelope(1, None)).await.unwrap();
        assert_eq!(
            queue.pop_ready().unwrap().invocation.correlation_id,
            first_id
        );
    }

    #[tokio::test]
    async fn run_after_delays_readiness() {
        let queue = InMemoryQueue::new();
        queue.submit(envelope(0, Some(5_000))).await.unwrap();
        assert!(queue.pop_ready().is_none());
        assert!(queue.next_ready_at().unwrap() > Instant::now());
        assert_eq!(queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn ready_work_is_not_stalled_behind_a_delayed_higher_priority_item() {
        let queue = InMemoryQueue::new();
        queue.submit(envelope(10, Some(60_000))).await.unwrap();
        queue.submit(envelope(0, None)).await.unwrap();

        let popped = queue.pop_ready().expect("ready envelope pops immediately");
        assert_eq!(popped.invocation.priority, 0);
        // Only the delayed envelope remains; nothing is ready yet.
        assert!(queue.pop_ready().is_none());
        assert!(queue.next_ready_at().unwrap() > Instant::now());
        assert_eq!(queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn delayed_item_joins_priority_order_once_ready() {
        let queue = InMemoryQueue::new();
        queue.submit(envelope(5, Some(10))).await.unwrap();
        queue.submit(envelope(0, None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let priorities: Vec<i32> = std::iter::from_fn(|| queue.pop_ready())
            .map(|e| e.invocation.priority)
            .collect();
        assert_eq!(priorities, vec![5, 0]);
    }

    #[tokio::test]
    async fn envelope_round_trips_through_serialization() {
        let envelope = envelope(3, Some(100));
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: InvocationEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.invocation.priority, 3);
        assert_eq!(decoded.invocation.run_after_ms, Some(100));
        assert_eq!(
            decoded.invocation.correlation_id,
            envelope.invocation.correlation_id
        );
    }
}
