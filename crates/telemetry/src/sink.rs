// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Pluggable metrics sinks (spec.md §6) and the default logging
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::node_metrics::NodeMetricsSnapshot;
use crate::pipeline_metrics::PipelineMetricsSnapshot;

/// A metrics sink failed to record a snapshot (spec.md §7: "Collector and
/// sink errors during emitMetrics propagate to the caller").
#[derive(Debug, Clone, thiserror::Error)]
#[error("metrics sink failed: {0}")]
pub struct SinkError(pub Arc<dyn std::error::Error + Send + Sync>);

impl SinkError {
    /// Wraps an arbitrary sink-side error.
    pub fn new(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        SinkError(Arc::new(cause))
    }

    /// Builds a `SinkError` from a plain message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        SinkError(Arc::new(SinkMessage(message.into())))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
struct SinkMessage(String);

/// An output for per-node metrics, invoked once per node at terminal
/// pipeline completion.
///
/// Implementations are free (file, HTTP exporter, in-memory test probe);
/// the core only supplies [`LoggingMetricsSink`]. Concrete connectors for
/// other backends are out of scope for the core (spec.md §1).
#[async_trait]
pub trait NodeMetricsSink: Send + Sync {
    /// Records one node's final metrics.
    async fn record_node_metrics(&self, snapshot: &NodeMetricsSnapshot) -> Result<(), SinkError>;
}

/// An output for the pipeline-level aggregate, invoked once per run after
/// every node sink call has returned.
#[async_trait]
pub trait PipelineMetricsSink: Send + Sync {
    /// Records the run's aggregate metrics.
    async fn record_pipeline_metrics(&self, snapshot: &PipelineMetricsSnapshot) -> Result<(), SinkError>;
}

/// The default sink: emits structured `tracing` events instead of
/// performing any IO of its own.
///
/// Severity follows spec.md §6: `Info` on node/pipeline success, `Warning`
/// on node failure, `Error` on pipeline failure, `Debug` for the detailed
/// numeric fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMetricsSink;

#[async_trait]
impl NodeMetricsSink for LoggingMetricsSink {
    async fn record_node_metrics(&self, snapshot: &NodeMetricsSnapshot) -> Result<(), SinkError> {
        match snapshot.success {
            Some(false) => tracing::warn!(
                node_id = %snapshot.node_id,
                items_processed = snapshot.items_processed,
                items_emitted = snapshot.items_emitted,
                retry_count = snapshot.retry_count,
                error = snapshot.error.as_deref().unwrap_or("<unknown>"),
                "node failed"
            ),
            Some(true) => tracing::info!(
                node_id = %snapshot.node_id,
                items_processed = snapshot.items_processed,
                items_emitted = snapshot.items_emitted,
                retry_count = snapshot.retry_count,
                duration_ms = snapshot.duration_ms,
                "node completed"
            ),
            None => tracing::debug!(node_id = %snapshot.node_id, "node metrics incomplete (no end recorded)"),
        }
        tracing::debug!(
            node_id = %snapshot.node_id,
            peak_memory_mb = snapshot.peak_memory_mb,
            thread_id = snapshot.thread_id,
            throughput_items_per_sec = snapshot.throughput_items_per_sec,
            avg_item_ms = snapshot.avg_item_ms,
            "node metrics detail"
        );
        Ok(())
    }
}

#[async_trait]
impl PipelineMetricsSink for LoggingMetricsSink {
    async fn record_pipeline_metrics(&self, snapshot: &PipelineMetricsSnapshot) -> Result<(), SinkError> {
        if snapshot.success {
            tracing::info!(
                pipeline = %snapshot.pipeline_name,
                run_id = %snapshot.run_id,
                total_items_processed = snapshot.total_items_processed,
                duration_ms = snapshot.duration_ms,
                "pipeline run completed"
            );
        } else {
            tracing::error!(
                pipeline = %snapshot.pipeline_name,
                run_id = %snapshot.run_id,
                total_items_processed = snapshot.total_items_processed,
                error = snapshot.error.as_deref().unwrap_or("<unknown>"),
                "pipeline run failed"
            );
        }
        tracing::debug!(
            pipeline = %snapshot.pipeline_name,
            run_id = %snapshot.run_id,
            node_count = snapshot.node_metrics.len(),
            "pipeline metrics detail"
        );
        Ok(())
    }
}
