// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`NodeScope`]: a scoped acquisition around one node's execution that
//! feeds a [`MetricsCollector`] (spec.md §4.8).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;

use crate::collector::MetricsCollector;
use crate::options::ObservabilityOptions;

/// RAII guard opened when a node starts and closed (via [`Drop`] or the
/// explicit [`NodeScope::finish`]) when it ends.
///
/// Mutations between open and close are atomic and safe to call from
/// multiple worker threads feeding the same node concurrently (e.g. the
/// parallelism layer's worker pool). Disposal is idempotent: once a scope
/// has recorded its end, further mutations and a second `finish`/`drop` are
/// silently ignored.
pub struct NodeScope {
    collector: Arc<MetricsCollector>,
    node_id: String,
    options: ObservabilityOptions,
    start: std::time::Instant,
    processed: AtomicU64,
    emitted: AtomicU64,
    failure: parking_lot::Mutex<Option<String>>,
    finished: std::sync::atomic::AtomicBool,
}

impl NodeScope {
    /// Opens a scope for `node_id`, recording a node start on `collector`.
    #[must_use]
    pub fn open(collector: Arc<MetricsCollector>, node_id: impl Into<String>, options: ObservabilityOptions) -> Self {
        let node_id = node_id.into();
        let thread_id = options
            .contains(ObservabilityOptions::RECORD_THREAD_INFO)
            .then(current_thread_id);
        let initial_memory = options
            .contains(ObservabilityOptions::RECORD_MEMORY_USAGE)
            .then(sample_memory_mb)
            .flatten();
        if options.contains(ObservabilityOptions::RECORD_TIMING) {
            collector.record_node_start(&node_id, Utc::now(), thread_id, initial_memory);
        }
        NodeScope {
            collector,
            node_id,
            options,
            start: std::time::Instant::now(),
            processed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            failure: parking_lot::Mutex::new(None),
            finished: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The node this scope is recording for.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Accumulates one processed item, if item-count recording is on.
    pub fn increment_processed(&self) {
        if self.options.contains(ObservabilityOptions::RECORD_ITEM_COUNTS) {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Accumulates one emitted item, if item-count recording is on.
    pub fn increment_emitted(&self) {
        if self.options.contains(ObservabilityOptions::RECORD_ITEM_COUNTS) {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Accumulates `delta` processed items at once (used by batch flushes,
    /// spec.md §4.7, where the element count is known up front).
    pub fn record_item_count(&self, processed_delta: u64, emitted_delta: u64) {
        if self.options.contains(ObservabilityOptions::RECORD_ITEM_COUNTS) {
            self.processed.fetch_add(processed_delta, Ordering::Relaxed);
            self.emitted.fetch_add(emitted_delta, Ordering::Relaxed);
        }
    }

    /// Records the node's terminal failure cause. Does not itself close the
    /// scope; call [`NodeScope::finish`] to do that.
    pub fn record_failure(&self, error: impl std::fmt::Display) {
        *self.failure.lock() = Some(error.to_string());
    }

    /// Closes the scope, recording end time, success and (if performance
    /// recording is on and at least one item was seen) throughput.
    ///
    /// Idempotent: a second call is a no-op.
    pub fn finish(&self, success: bool) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush(success);
    }

    fn flush(&self, success: bool) {
        let processed = self.processed.load(Ordering::Relaxed);
        let emitted = self.emitted.load(Ordering::Relaxed);
        if self.options.contains(ObservabilityOptions::RECORD_ITEM_COUNTS) {
            self.collector.record_item_metrics(&self.node_id, processed, emitted);
        }
        let duration = self.start.elapsed();
        let error = self.failure.lock().clone();
        let overall_success = success && error.is_none();
        if self.options.contains(ObservabilityOptions::RECORD_TIMING) {
            let peak_memory = self
                .options
                .contains(ObservabilityOptions::RECORD_MEMORY_USAGE)
                .then(sample_memory_mb)
                .flatten();
            self.collector.record_node_end(
                &self.node_id,
                Utc::now(),
                overall_success,
                error,
                peak_memory,
                None,
            );
        }
        if self.options.contains(ObservabilityOptions::RECORD_PERFORMANCE_METRICS)
            && processed > 0
            && duration.as_secs_f64() > 0.0
        {
            let throughput = processed as f64 / duration.as_secs_f64();
            let avg_item_ms = duration.as_secs_f64() * 1000.0 / processed as f64;
            self.collector.record_performance(&self.node_id, throughput, avg_item_ms);
        }
    }
}

impl Drop for NodeScope {
    fn drop(&mut self) {
        // A dropped-without-finish scope (panic unwind, early return) still
        // records its final state rather than leaving the node's metrics
        // stuck at "started".
        self.finish(self.failure.lock().is_none());
    }
}

fn current_thread_id() -> u64 {
    // `ThreadId` has no stable numeric accessor; hash its debug form into a
    // u64 so it is at least stable and comparable across samples from the
    // same thread.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

fn sample_memory_mb() -> Option<f64> {
    memory_stats::memory_stats().map(|usage| usage.physical_mem as f64 / (1024.0 * 1024.0))
}
