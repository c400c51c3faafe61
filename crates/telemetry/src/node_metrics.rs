// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-node, per-run metrics: the snapshot the collector hands back from
//! [`crate::MetricsCollector::get`] and feeds to a [`crate::NodeMetricsSink`].

use chrono::{DateTime, Utc};

/// An immutable snapshot of everything the collector has recorded for one
/// node during the current run.
///
/// Every field beyond `node_id` is optional: a field is only populated once
/// the corresponding event has actually been observed, and several are
/// gated by [`crate::ObservabilityOptions`].
#[derive(Clone, Debug, PartialEq)]
pub struct NodeMetricsSnapshot {
    /// The node this snapshot describes.
    pub node_id: String,
    /// Timestamp of the most recent `recordNodeStart`.
    pub start_time: Option<DateTime<Utc>>,
    /// Timestamp of `recordNodeEnd`, if the node has finished.
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time`, in milliseconds.
    pub duration_ms: Option<i64>,
    /// Whether the node completed without failure. `None` until the node
    /// ends.
    pub success: Option<bool>,
    /// Total items consumed by the node.
    pub items_processed: u64,
    /// Total items produced by the node.
    pub items_emitted: u64,
    /// The underlying cause, if `success == Some(false)`.
    pub error: Option<String>,
    /// The maximum retry attempt number observed for this node.
    pub retry_count: u32,
    /// Peak per-node memory delta in megabytes, if memory sampling is on.
    pub peak_memory_mb: Option<f64>,
    /// OS thread id the node most recently started on, if thread-info
    /// recording is on.
    pub thread_id: Option<u64>,
    /// CPU time consumed by the node, in milliseconds, if reported.
    pub cpu_time_ms: Option<f64>,
    /// Items per second, computed once both item counts and duration are
    /// known and performance-metrics recording is on.
    pub throughput_items_per_sec: Option<f64>,
    /// Average milliseconds spent per item.
    pub avg_item_ms: Option<f64>,
}

impl NodeMetricsSnapshot {
    /// An empty snapshot for a node that has not yet started.
    #[must_use]
    pub fn empty(node_id: impl Into<String>) -> Self {
        NodeMetricsSnapshot {
            node_id: node_id.into(),
            start_time: None,
            end_time: None,
            duration_ms: None,
            success: None,
            items_processed: 0,
            items_emitted: 0,
            error: None,
            retry_count: 0,
            peak_memory_mb: None,
            thread_id: None,
            cpu_time_ms: None,
            throughput_items_per_sec: None,
            avg_item_ms: None,
        }
    }
}
