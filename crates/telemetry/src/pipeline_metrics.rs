// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The run-level aggregate handed to a [`crate::PipelineMetricsSink`] at
//! terminal pipeline completion.

use chrono::{DateTime, Utc};

use crate::node_metrics::NodeMetricsSnapshot;

/// Aggregate metrics for a single pipeline run, built from the per-node
/// snapshots the collector holds at the moment the run ends.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineMetricsSnapshot {
    /// Name of the pipeline definition that produced this run.
    pub pipeline_name: String,
    /// Unique id of this run.
    pub run_id: String,
    /// Run start timestamp.
    pub start_time: DateTime<Utc>,
    /// Run end timestamp.
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time`, if `end_time` is known.
    pub duration_ms: Option<i64>,
    /// Whether every node completed without failure.
    pub success: bool,
    /// Sum of `items_processed` over every node record.
    pub total_items_processed: u64,
    /// Snapshot of every node the collector has an entry for.
    pub node_metrics: Vec<NodeMetricsSnapshot>,
    /// The run's root failure cause, if `success == false`.
    pub error: Option<String>,
}

impl PipelineMetricsSnapshot {
    /// Builds the aggregate from a set of per-node snapshots.
    #[must_use]
    pub fn aggregate(
        pipeline_name: impl Into<String>,
        run_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        success: bool,
        error: Option<String>,
        node_metrics: Vec<NodeMetricsSnapshot>,
    ) -> Self {
        let total_items_processed = node_metrics.iter().map(|n| n.items_processed).sum();
        let duration_ms = end_time.map(|end| (end - start_time).num_milliseconds());
        PipelineMetricsSnapshot {
            pipeline_name: pipeline_name.into(),
            run_id: run_id.into(),
            start_time,
            end_time,
            duration_ms,
            success,
            total_items_processed,
            node_metrics,
            error,
        }
    }
}
