// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`MetricsCollector`]: the thread-safe, per-run, per-node metrics
//! aggregator.
//!
//! Keyed by `nodeId` in a [`DashMap`](dashmap::DashMap) so concurrent
//! recording for two different nodes never contends beyond the map's own
//! shard locking (spec.md §5, §9). Within one node's entry, item counters
//! are atomic; scalar fields (peak memory, throughput, …) are
//! last-writer-wins behind a small per-entry mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::node_metrics::NodeMetricsSnapshot;
use crate::pipeline_metrics::PipelineMetricsSnapshot;
use crate::sink::{NodeMetricsSink, PipelineMetricsSink, SinkError};

/// Failure surfaced by [`MetricsCollector::emit_metrics`]: either a sink
/// itself reported an error, or emission was cancelled before every sink
/// had been invoked.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmitError {
    /// Emission was cancelled (the run's cancellation signal fired) before
    /// every node/pipeline sink had been called.
    #[error("metrics emission cancelled")]
    Cancelled,

    /// A node or pipeline sink returned an error (spec.md §7: sink errors
    /// during `emitMetrics` propagate to the caller).
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Default)]
struct Scalars {
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    success: Option<bool>,
    error: Option<String>,
    peak_memory_mb: Option<f64>,
    thread_id: Option<u64>,
    cpu_time_ms: Option<f64>,
    throughput_items_per_sec: Option<f64>,
    avg_item_ms: Option<f64>,
}

struct NodeEntry {
    items_processed: AtomicU64,
    items_emitted: AtomicU64,
    retry_count: AtomicU64,
    scalars: Mutex<Scalars>,
}

impl Default for NodeEntry {
    fn default() -> Self {
        NodeEntry {
            items_processed: AtomicU64::new(0),
            items_emitted: AtomicU64::new(0),
            retry_count: AtomicU64::new(0),
            scalars: Mutex::new(Scalars::default()),
        }
    }
}

/// The thread-safe per-run node metrics aggregator (spec.md §4.8).
///
/// All mutation methods are idempotent where the spec calls for it and
/// never block on an entry for a different `nodeId`.
#[derive(Default)]
pub struct MetricsCollector {
    nodes: DashMap<String, NodeEntry>,
}

impl MetricsCollector {
    /// Creates an empty collector, ready for a new run.
    #[must_use]
    pub fn new() -> Self {
        MetricsCollector::default()
    }

    /// Creates or refreshes a node's entry with a new start. `startTime` is
    /// overwritten on repeated calls: latest wins. A start is required for
    /// `record_node_end`, `record_item_metrics`, `record_retry` and
    /// `record_performance` to have any effect.
    ///
    /// `thread_id`/`initial_memory_mb` merge rather than overwrite: a `None`
    /// leaves a previously recorded value in place instead of clearing it.
    /// A node's start is legitimately recorded twice in production (once by
    /// `NodeScope::open`, which samples the real thread/memory baseline
    /// gated by `ObservabilityOptions`, then again by
    /// `MetricsCollectingExecutionObserver::on_node_started`, which always
    /// passes `None` for both since it has no scope to sample from) and the
    /// second call must not wipe out what the first one sampled.
    pub fn record_node_start(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        thread_id: Option<u64>,
        initial_memory_mb: Option<f64>,
    ) {
        let entry = self.nodes.entry(node_id.to_string()).or_default();
        let mut scalars = entry.scalars.lock();
        scalars.start_time = Some(ts);
        scalars.end_time = None;
        scalars.success = None;
        scalars.error = None;
        if thread_id.is_some() {
            scalars.thread_id = thread_id;
        }
        if initial_memory_mb.is_some() {
            // `peak_memory_mb` here temporarily holds the starting sample;
            // the final delta is computed in `record_node_end`.
            scalars.peak_memory_mb = initial_memory_mb;
        }
    }

    /// Records node completion. A no-op if the node has no recorded start
    /// (guards against stray completion events, spec.md §4.8).
    #[allow(clippy::too_many_arguments)]
    pub fn record_node_end(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        success: bool,
        error: Option<String>,
        peak_memory_mb: Option<f64>,
        cpu_time_ms: Option<f64>,
    ) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        let mut scalars = entry.scalars.lock();
        if scalars.start_time.is_none() {
            return;
        }
        scalars.end_time = Some(ts);
        scalars.success = Some(success);
        scalars.error = error;
        if let Some(peak) = peak_memory_mb {
            let initial = scalars.peak_memory_mb.unwrap_or(0.0);
            scalars.peak_memory_mb = Some(peak - initial);
        }
        scalars.cpu_time_ms = cpu_time_ms;
    }

    /// Atomically accumulates processed/emitted item deltas. A no-op if the
    /// node has no recorded start.
    pub fn record_item_metrics(&self, node_id: &str, processed_delta: u64, emitted_delta: u64) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        if entry.scalars.lock().start_time.is_none() {
            return;
        }
        entry
            .items_processed
            .fetch_add(processed_delta, Ordering::Relaxed);
        entry
            .items_emitted
            .fetch_add(emitted_delta, Ordering::Relaxed);
    }

    /// Updates the retry counter to `max(current, attempt)`. The `reason`
    /// is accepted for interface parity with the spec but is not retained
    /// in the snapshot (the observer already logs it).
    pub fn record_retry(&self, node_id: &str, attempt: u32, _reason: Option<&str>) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        if entry.scalars.lock().start_time.is_none() {
            return;
        }
        entry.retry_count.fetch_max(u64::from(attempt), Ordering::Relaxed);
    }

    /// Overwrites throughput and average per-item time.
    pub fn record_performance(&self, node_id: &str, throughput_items_per_sec: f64, avg_item_ms: f64) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        let mut scalars = entry.scalars.lock();
        if scalars.start_time.is_none() {
            return;
        }
        scalars.throughput_items_per_sec = Some(throughput_items_per_sec);
        scalars.avg_item_ms = Some(avg_item_ms);
    }

    /// An immutable snapshot of one node's current state, or `None` if the
    /// node has no entry.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<NodeMetricsSnapshot> {
        self.nodes.get(node_id).map(|entry| Self::snapshot(node_id, &entry))
    }

    /// A snapshot of every node the collector currently has an entry for.
    #[must_use]
    pub fn get_all(&self) -> Vec<NodeMetricsSnapshot> {
        self.nodes
            .iter()
            .map(|kv| Self::snapshot(kv.key(), kv.value()))
            .collect()
    }

    fn snapshot(node_id: &str, entry: &NodeEntry) -> NodeMetricsSnapshot {
        let scalars = entry.scalars.lock();
        let duration_ms = match (scalars.start_time, scalars.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        NodeMetricsSnapshot {
            node_id: node_id.to_string(),
            start_time: scalars.start_time,
            end_time: scalars.end_time,
            duration_ms,
            success: scalars.success,
            items_processed: entry.items_processed.load(Ordering::Relaxed),
            items_emitted: entry.items_emitted.load(Ordering::Relaxed),
            error: scalars.error.clone(),
            retry_count: u32::try_from(entry.retry_count.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
            peak_memory_mb: scalars.peak_memory_mb,
            thread_id: scalars.thread_id,
            cpu_time_ms: scalars.cpu_time_ms,
            throughput_items_per_sec: scalars.throughput_items_per_sec,
            avg_item_ms: scalars.avg_item_ms,
        }
    }

    /// Aggregates the collector's current node snapshots into a pipeline
    /// metrics record (spec.md §4.8).
    #[must_use]
    pub fn create_pipeline_metrics(
        &self,
        pipeline_name: &str,
        run_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        success: bool,
        error: Option<String>,
    ) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot::aggregate(
            pipeline_name,
            run_id,
            start,
            end,
            success,
            error,
            self.get_all(),
        )
    }

    /// Emits the current state to the configured sinks: every node
    /// snapshot first (in `get_all` order), then the pipeline aggregate.
    /// A sink error or cancellation aborts the pass immediately and is
    /// propagated to the caller (spec.md §7) without poisoning recorded
    /// metrics; the caller may still call `get`/`get_all` afterwards.
    #[allow(clippy::too_many_arguments)]
    pub async fn emit_metrics(
        &self,
        pipeline_name: &str,
        run_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        success: bool,
        error: Option<String>,
        node_sink: Option<&(dyn NodeMetricsSink)>,
        pipeline_sink: Option<&(dyn PipelineMetricsSink)>,
        cancellation: &CancellationToken,
    ) -> Result<(), EmitError> {
        let aggregate = self.create_pipeline_metrics(pipeline_name, run_id, start, end, success, error);
        if let Some(sink) = node_sink {
            for node in &aggregate.node_metrics {
                tokio::select! {
                    result = sink.record_node_metrics(node) => result?,
                    () = cancellation.cancelled() => return Err(EmitError::Cancelled),
                }
            }
        }
        if let Some(sink) = pipeline_sink {
            tokio::select! {
                result = sink.record_pipeline_metrics(&aggregate) => result?,
                () = cancellation.cancelled() => return Err(EmitError::Cancelled),
            }
        }
        Ok(())
    }
}
