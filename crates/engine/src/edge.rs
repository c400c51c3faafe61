// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`OutputPort`]: the producer-side wrapper every node kind emits through.
//!
//! Centralises the three behaviours spec.md §4.5 attaches to "the edge's
//! execution annotation" from the producing side: applying the configured
//! [`crate::policy::QueuePolicy`] on enqueue, counting and reporting drops,
//! and periodically emitting `queue-metrics` observer events. Every node
//! that produces output (`Source`, a `Transform`'s per-item result,
//! `Batcher`'s flush, `Unbatcher`'s per-element emit) goes through one of
//! these rather than touching its outgoing `Pipe` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flowgraph_channel::{EnqueueOutcome, Pipe, TryEnqueueOutcome};
use flowgraph_telemetry::NodeScope;
use parking_lot::Mutex;

use crate::observer::{DropEvent, ExecutionObserver, QueueMetricsEvent};
use crate::policy::{ConcurrencyPolicy, DropKind, QueuePolicy};

/// Whether an [`OutputPort::emit`] call resulted in the item entering the
/// downstream pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The item is now buffered in the downstream edge.
    Enqueued,
    /// The item was dropped: either the configured queue policy rejected
    /// it under pressure, or the downstream pipe had already reached a
    /// terminal state (completion, failure or cancellation).
    Dropped,
}

struct Throughput {
    last_sample: Mutex<Instant>,
    since_last: AtomicU64,
}

impl Throughput {
    fn new() -> Self {
        Throughput {
            last_sample: Mutex::new(Instant::now()),
            since_last: AtomicU64::new(0),
        }
    }

    /// Samples items/sec since the previous sample, folding in the current
    /// item. `None` if no measurable time has passed yet.
    fn sample(&self) -> Option<f64> {
        let count = self.since_last.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = self.last_sample.lock();
        let elapsed = last.elapsed();
        if elapsed.as_secs_f64() <= 0.0 {
            return None;
        }
        *last = Instant::now();
        self.since_last.store(0, Ordering::Relaxed);
        Some(count as f64 / elapsed.as_secs_f64())
    }
}

/// The producer-side handle to one edge's pipe, bundling the edge's
/// [`ConcurrencyPolicy`] and observer wiring.
pub struct OutputPort<T> {
    pipe: Pipe<T>,
    node_id: Arc<str>,
    policy: ConcurrencyPolicy,
    observer: Option<Arc<dyn ExecutionObserver>>,
    scope: Arc<NodeScope>,
    total_dropped: AtomicU64,
    throughput: Throughput,
}

impl<T: Send + 'static> OutputPort<T> {
    /// Builds an output port over `pipe` for the node `node_id`, applying
    /// `policy` on every [`Self::emit`] call.
    pub(crate) fn new(
        pipe: Pipe<T>,
        node_id: Arc<str>,
        policy: ConcurrencyPolicy,
        observer: Option<Arc<dyn ExecutionObserver>>,
        scope: Arc<NodeScope>,
    ) -> Self {
        OutputPort {
            pipe,
            node_id,
            policy,
            observer,
            scope,
            total_dropped: AtomicU64::new(0),
            throughput: Throughput::new(),
        }
    }

    /// Offers `item` downstream, applying the edge's queue policy. Always
    /// increments the producing node's `items emitted` counter, whether or
    /// not the item was actually accepted (spec.md §8, scenario S5:
    /// `itemsEmitted(producer) = itemsProcessed(consumer) + totalDropped`).
    pub async fn emit(&self, item: T) -> EmitOutcome {
        self.emit_counted(item, 1).await
    }

    /// Like [`Self::emit`], but accounts `weight` items emitted instead of
    /// one. Used by the Batcher (spec.md §4.7): a single flush is one pipe
    /// item but its `items emitted` count is the batch's element count, not
    /// `1`.
    pub(crate) async fn emit_counted(&self, item: T, weight: u64) -> EmitOutcome {
        self.scope.record_item_count(0, weight);
        let outcome = match self.policy.queue_policy {
            QueuePolicy::Blocking => match self.pipe.enqueue(item).await {
                EnqueueOutcome::Enqueued => EmitOutcome::Enqueued,
                EnqueueOutcome::Dropped(_) => EmitOutcome::Dropped,
            },
            QueuePolicy::DropOldest => match self.pipe.enqueue_evicting_oldest(item) {
                Ok(evicted) => {
                    if evicted.is_some() {
                        self.record_drop(DropKind::Oldest);
                    }
                    EmitOutcome::Enqueued
                }
                Err(_) => EmitOutcome::Dropped,
            },
            QueuePolicy::DropNewest => match self.pipe.try_enqueue(item) {
                TryEnqueueOutcome::Enqueued => EmitOutcome::Enqueued,
                TryEnqueueOutcome::Full(_) => {
                    self.record_drop(DropKind::Newest);
                    EmitOutcome::Dropped
                }
                TryEnqueueOutcome::Closed(_) => EmitOutcome::Dropped,
            },
        };
        self.emit_queue_metrics();
        outcome
    }

    /// Marks the edge complete: no more items will be enqueued.
    pub(crate) fn complete(&self) {
        self.pipe.complete();
    }

    /// Fails the edge with `error`, surfacing it to the consumer on its
    /// next drain.
    pub(crate) fn fail(&self, error: impl Into<flowgraph_channel::PipeFailure>) {
        self.pipe.fail(error);
    }

    fn record_drop(&self, kind: DropKind) {
        let total = self.total_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(observer) = &self.observer {
            let policy_name = match self.policy.queue_policy {
                QueuePolicy::Blocking => "Blocking",
                QueuePolicy::DropOldest => "DropOldest",
                QueuePolicy::DropNewest => "DropNewest",
            };
            observer.on_drop(DropEvent {
                node_id: Arc::clone(&self.node_id),
                policy_name,
                kind,
                queue_length: self.pipe.len(),
                max_queue_length: self.policy.max_queue_length,
                dropped_count: 1,
                total_dropped: total,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn emit_queue_metrics(&self) {
        let Some(observer) = &self.observer else {
            return;
        };
        let policy_name = match self.policy.queue_policy {
            QueuePolicy::Blocking => "Blocking",
            QueuePolicy::DropOldest => "DropOldest",
            QueuePolicy::DropNewest => "DropNewest",
        };
        observer.on_queue_metrics(QueueMetricsEvent {
            node_id: Arc::clone(&self.node_id),
            policy_name,
            queue_length: self.pipe.len(),
            max_queue_length: self.policy.max_queue_length,
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            capacity: self.policy.max_queue_length,
            throughput: self.throughput.sample(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Total items dropped on this edge so far.
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}
