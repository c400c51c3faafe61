// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The execution observer interface (spec.md §6): five events fanned out
//! from the scheduler and parallelism layer to zero or more observers.
//!
//! Observers never block the producing path: every call here is
//! enqueue-and-forget from the scheduler's point of view (spec.md §9,
//! "events fanned out to observers" — use message passing, never block the
//! hot path). `ExecutionObserver` is therefore `Send + Sync` and its
//! methods take `&self`; an observer that wants to buffer and drain
//! asynchronously is free to hold an internal channel.

use std::sync::Arc;
use std::time::Duration;

use crate::error::NodeExecutionError;
use crate::policy::DropKind;

/// Which retry mechanism produced an [`ExecutionObserver::on_retry`] call
/// (spec.md §4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    /// A single item's `Transform::execute` was retried.
    ItemRetry,
    /// Reserved for a future coarse-grained node restart policy. No
    /// built-in component in this crate ever constructs this variant
    /// (spec.md §9, open question, resolved in `DESIGN.md`).
    NodeRestart,
}

/// `OnNodeStarted` (spec.md §6).
#[derive(Debug, Clone)]
pub struct NodeStartedEvent {
    /// The node that started.
    pub node_id: Arc<str>,
    /// The node's kind, as a human-readable label (`"Source"`, …).
    pub node_type: &'static str,
    /// Wall-clock time of the start.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `OnNodeCompleted` (spec.md §6).
#[derive(Debug, Clone)]
pub struct NodeCompletedEvent {
    /// The node that completed (successfully or not).
    pub node_id: Arc<str>,
    /// The node's kind, as a human-readable label.
    pub node_type: &'static str,
    /// Wall-clock duration of the node's execution.
    pub duration: Duration,
    /// Whether the node completed without failure.
    pub success: bool,
    /// The failure cause, if `success` is `false`.
    pub error: Option<NodeExecutionError>,
}

/// `OnRetry` (spec.md §6).
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// The node whose item (or, for `NodeRestart`, whose whole execution)
    /// is being retried.
    pub node_id: Arc<str>,
    /// Which retry mechanism this is.
    pub kind: RetryKind,
    /// The 1-based attempt number that just failed.
    pub attempt: u32,
    /// The error that triggered this retry, if any.
    pub error: Option<String>,
}

/// `OnDrop` (spec.md §6).
#[derive(Debug, Clone)]
pub struct DropEvent {
    /// The node whose input edge dropped an item.
    pub node_id: Arc<str>,
    /// Human-readable name of the policy in effect (`"DropOldest"`, …).
    pub policy_name: &'static str,
    /// Which side of the queue actually lost the item.
    pub kind: DropKind,
    /// The queue's length at the moment of the drop.
    pub queue_length: usize,
    /// The queue's configured bound.
    pub max_queue_length: usize,
    /// Items dropped by this one event (always `1` in this implementation;
    /// kept as a count for interface parity with spec.md §4.5).
    pub dropped_count: u64,
    /// Running total of items dropped on this edge so far this run.
    pub total_dropped: u64,
    /// Wall-clock time of the drop.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `OnQueueMetrics` (spec.md §6).
#[derive(Debug, Clone)]
pub struct QueueMetricsEvent {
    /// The node whose input edge this reports on.
    pub node_id: Arc<str>,
    /// Human-readable name of the policy in effect.
    pub policy_name: &'static str,
    /// The queue's current length.
    pub queue_length: usize,
    /// The queue's configured bound.
    pub max_queue_length: usize,
    /// Running total of items dropped on this edge so far this run.
    pub total_dropped: u64,
    /// The queue's configured capacity (equal to `max_queue_length`; kept
    /// as a distinct field for interface parity with spec.md §6).
    pub capacity: usize,
    /// Items enqueued per second since the previous emission, if
    /// computable.
    pub throughput: Option<f64>,
    /// Wall-clock time of the sample.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The five-event execution observer interface (spec.md §6).
///
/// Every method has a default no-op body so implementors only override the
/// events they care about. All methods take `&self`: an observer that
/// mutates its own state does so through interior mutability, matching the
/// "shared mutable collector" shape spec.md §9 asks every subsystem in this
/// crate to use.
pub trait ExecutionObserver: Send + Sync {
    /// A node started executing.
    fn on_node_started(&self, _event: NodeStartedEvent) {}

    /// A node finished executing, successfully or not.
    fn on_node_completed(&self, _event: NodeCompletedEvent) {}

    /// An item or node retry was attempted.
    fn on_retry(&self, _event: RetryEvent) {}

    /// An edge's bounded queue dropped an item.
    fn on_drop(&self, _event: DropEvent) {}

    /// A periodic (at least per-enqueue) sample of an edge's queue state.
    fn on_queue_metrics(&self, _event: QueueMetricsEvent) {}
}

/// A fan-out observer that forwards every event to each of its members, in
/// order. Lets a run wire up, say, both a [`crate::metrics_observer::MetricsCollectingExecutionObserver`]
/// and a user-supplied tracing observer without either needing to know
/// about the other.
#[derive(Default)]
pub struct BroadcastObserver {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl BroadcastObserver {
    /// An empty broadcaster; observers are added with [`Self::push`].
    #[must_use]
    pub fn new() -> Self {
        BroadcastObserver::default()
    }

    /// Adds an observer to the fan-out list.
    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }
}

impl ExecutionObserver for BroadcastObserver {
    fn on_node_started(&self, event: NodeStartedEvent) {
        for observer in &self.observers {
            observer.on_node_started(event.clone());
        }
    }

    fn on_node_completed(&self, event: NodeCompletedEvent) {
        for observer in &self.observers {
            observer.on_node_completed(event.clone());
        }
    }

    fn on_retry(&self, event: RetryEvent) {
        for observer in &self.observers {
            observer.on_retry(event.clone());
        }
    }

    fn on_drop(&self, event: DropEvent) {
        for observer in &self.observers {
            observer.on_drop(event.clone());
        }
    }

    fn on_queue_metrics(&self, event: QueueMetricsEvent) {
        for observer in &self.observers {
            observer.on_queue_metrics(event.clone());
        }
    }
}
