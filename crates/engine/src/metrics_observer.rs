// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`MetricsCollectingExecutionObserver`]: the observer bridge that turns
//! [`ExecutionObserver`] events into [`MetricsCollector`] calls (spec.md
//! §4.8 "Observer bridge").
//!
//! `OnDrop` and `OnQueueMetrics` are deliberately not recorded here: spec.md
//! §4.8 reserves per-node metrics for the five other event kinds and leaves
//! drop/queue accounting to whatever other observer a caller wires up
//! alongside this one (e.g. through [`crate::observer::BroadcastObserver`]).

use std::sync::Arc;

use chrono::Utc;

use flowgraph_telemetry::MetricsCollector;

use crate::observer::{ExecutionObserver, NodeCompletedEvent, NodeStartedEvent, RetryEvent};

/// Bridges execution events onto a [`MetricsCollector`] (spec.md §4.8).
pub struct MetricsCollectingExecutionObserver {
    collector: Arc<MetricsCollector>,
}

impl MetricsCollectingExecutionObserver {
    /// Wraps `collector`, translating every observed event into a call on
    /// it.
    #[must_use]
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        MetricsCollectingExecutionObserver { collector }
    }
}

impl ExecutionObserver for MetricsCollectingExecutionObserver {
    fn on_node_started(&self, event: NodeStartedEvent) {
        self.collector.record_node_start(&event.node_id, event.timestamp, None, None);
    }

    fn on_node_completed(&self, event: NodeCompletedEvent) {
        let Some(start) = self.collector.get(&event.node_id).and_then(|snapshot| snapshot.start_time) else {
            // No recorded start: a stray completion. Guarded against per
            // spec.md §4.8 ("Completion without a prior start is silently
            // ignored").
            return;
        };
        let end = start
            + chrono::Duration::from_std(event.duration).unwrap_or_else(|_| chrono::Duration::zero());
        let error = event.error.as_ref().map(ToString::to_string);
        self.collector
            .record_node_end(&event.node_id, end, event.success, error, None, None);
        if let Some(snapshot) = self.collector.get(&event.node_id) {
            let elapsed = event.duration.as_secs_f64();
            if snapshot.items_processed > 0 && elapsed > 0.0 {
                let throughput = snapshot.items_processed as f64 / elapsed;
                let avg_item_ms = elapsed * 1000.0 / snapshot.items_processed as f64;
                self.collector.record_performance(&event.node_id, throughput, avg_item_ms);
            }
        }
    }

    fn on_retry(&self, event: RetryEvent) {
        self.collector.record_retry(&event.node_id, event.attempt, event.error.as_deref());
    }
}
