// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-edge execution annotations: the concurrency/backpressure policy
//! (spec.md §4.5) and the item-retry policy (spec.md §4.6).
//!
//! These are the typed first-class form of the well-known annotation keys
//! `concurrency.policy` and `retry.policy` from spec.md §4.2. The
//! stringly-typed `annotate(handle, key, value)` escape hatch still exists
//! on [`crate::builder::GraphBuilder`] for forward-compatible annotations,
//! but every edge built through `connect` carries one of each of these.

use std::time::Duration;

/// How a bounded edge queue reacts when full and the producer tries to
/// enqueue another item (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePolicy {
    /// The producer suspends until capacity exists or the run is cancelled.
    Blocking,
    /// Evict the oldest buffered item, then enqueue the new one.
    DropOldest,
    /// Reject the incoming item; the oldest buffered items are unaffected.
    DropNewest,
}

/// Which side of a [`QueuePolicy::DropOldest`]/[`QueuePolicy::DropNewest`]
/// drop actually lost an item — named for the `OnDrop` observer event
/// (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropKind {
    /// The item that was already buffered (head of the queue) was evicted.
    Oldest,
    /// The item the producer was trying to enqueue was rejected.
    Newest,
}

/// The parallelism / backpressure annotation attached to an edge (spec.md
/// §4.2, §4.5).
///
/// `max_degree_of_parallelism` only has an effect on the edge feeding a
/// Transform node: it sizes that transform's worker pool. Edges feeding a
/// Sink, Batcher or Unbatcher are always drained by a single sequential
/// task regardless of this field, since spec.md §4.5 scopes the worker pool
/// to "Transform nodes" specifically.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyPolicy {
    /// What happens when the edge's bounded queue is full.
    pub queue_policy: QueuePolicy,
    /// Upper bound on the number of concurrent workers draining this edge
    /// (Transform edges only). `1` preserves per-edge FIFO by construction.
    pub max_degree_of_parallelism: usize,
    /// The bound on the number of buffered-but-undrained items.
    pub max_queue_length: usize,
    /// Optional extension (spec.md §4.5, §9): when `true` and
    /// `max_degree_of_parallelism > 1`, the parallelism layer reorders
    /// worker outputs back into input order using a small pending-output
    /// window, rather than emitting as workers finish.
    pub preserve_order: bool,
}

impl ConcurrencyPolicy {
    /// A single-worker blocking edge with a modest queue — the default for
    /// any edge that has not been explicitly annotated.
    #[must_use]
    pub const fn blocking(max_queue_length: usize) -> Self {
        ConcurrencyPolicy {
            queue_policy: QueuePolicy::Blocking,
            max_degree_of_parallelism: 1,
            max_queue_length,
            preserve_order: false,
        }
    }

    /// A blocking edge with `n` parallel workers draining it. FIFO is no
    /// longer guaranteed unless `preserve_order` is also set.
    #[must_use]
    pub const fn parallel(max_queue_length: usize, max_degree_of_parallelism: usize) -> Self {
        ConcurrencyPolicy {
            queue_policy: QueuePolicy::Blocking,
            max_degree_of_parallelism,
            max_queue_length,
            preserve_order: false,
        }
    }

    /// Requests output reordering back into input order. Only meaningful
    /// together with `max_degree_of_parallelism > 1`.
    #[must_use]
    pub const fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    /// Overrides the queue policy.
    #[must_use]
    pub const fn with_queue_policy(mut self, queue_policy: QueuePolicy) -> Self {
        self.queue_policy = queue_policy;
        self
    }
}

impl Default for ConcurrencyPolicy {
    /// `Blocking`, one worker, a queue of 64 — a conservative default that
    /// never drops an item and never reorders.
    fn default() -> Self {
        ConcurrencyPolicy::blocking(64)
    }
}

/// The item-retry annotation attached to an edge whose consumer is a
/// Transform (spec.md §4.2, §4.6).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per item, including the original call.
    /// `1` disables retry.
    pub max_attempts: u32,
    /// The base of the exponential backoff: `base_delay_ms * 2^(attempt-1)`.
    pub base_delay_ms: u64,
    /// Whether the computed delay is jittered by a uniform multiplier in
    /// `[0.5, 1.5)` (spec.md §9, following the backoff formula in
    /// `original_source`'s retry processor).
    pub jitter: bool,
    /// When attempts are exhausted: if `true`, the item is dropped and
    /// processing continues; if `false`, the item's failure becomes the
    /// node's failure (spec.md §4.6).
    pub continue_on_error: bool,
}

impl RetryPolicy {
    /// No retry: the first failure is immediately a node failure (unless
    /// `continue_on_error` is set).
    #[must_use]
    pub const fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 0,
            jitter: false,
            continue_on_error: false,
        }
    }

    /// `max_attempts` attempts with exponential backoff starting at
    /// `base_delay_ms`, jittered.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay_ms,
            jitter: true,
            continue_on_error: false,
        }
    }

    /// Drop the item instead of failing the node once attempts are
    /// exhausted.
    #[must_use]
    pub const fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// The delay before the given 1-based `attempt`'s retry, before
    /// jitter. `attempt` is the attempt number that just failed.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let millis = (self.base_delay_ms as f64) * 2f64.powi(exponent as i32);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::none()
    }
}
