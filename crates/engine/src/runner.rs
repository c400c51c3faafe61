// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`PipelineRunner`] and [`PipelineDefinition`]: the external entry point
//! (spec.md §6, "Pipeline definition interface" / "Pipeline runner
//! interface").

use std::sync::Arc;

use chrono::Utc;
use flowgraph_telemetry::{
    LoggingMetricsSink, MetricsCollector, NodeMetricsSink, PipelineMetricsSink, PipelineMetricsSnapshot,
};

use crate::builder::{Graph, GraphBuilder};
use crate::context::RunContext;
use crate::error::{NodeExecutionError, RunError};
use crate::metrics_observer::MetricsCollectingExecutionObserver;
use crate::observer::{BroadcastObserver, ExecutionObserver};
use crate::scheduler;

/// User code's declaration of a pipeline: populates a [`GraphBuilder`] given
/// a fresh [`RunContext`] (spec.md §6, "Pipeline definition interface").
pub trait PipelineDefinition: Send + Sync {
    /// Registers this definition's nodes and edges on `builder`.
    fn define(&self, builder: &mut GraphBuilder, context: &RunContext) -> Result<(), crate::error::GraphError>;
}

/// Drives one [`PipelineDefinition`] through a full run (spec.md §6,
/// "Pipeline runner interface").
///
/// Builds a fresh [`Graph`] from the definition on every [`Self::run`] call
/// (the definition itself is cheap and side-effect-free; only the graph it
/// produces needs to be rebuilt per run, since a `Graph` is immutable once
/// built per spec.md §3 "Lifecycle").
pub struct PipelineRunner {
    pipeline_name: String,
    observer: Option<Arc<dyn ExecutionObserver>>,
    node_sink: Option<Arc<dyn NodeMetricsSink>>,
    pipeline_sink: Option<Arc<dyn PipelineMetricsSink>>,
}

impl PipelineRunner {
    /// A runner named `pipeline_name`, with the default [`LoggingMetricsSink`]
    /// wired as both the node and pipeline metrics sink and no extra
    /// observer.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        let logging = Arc::new(LoggingMetricsSink);
        PipelineRunner {
            pipeline_name: pipeline_name.into(),
            observer: None,
            node_sink: Some(logging.clone()),
            pipeline_sink: Some(logging),
        }
    }

    /// Adds an observer whose events are broadcast alongside the runner's
    /// own metrics-collecting observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Overrides the node-metrics sink (`None` skips node-sink emission
    /// entirely).
    #[must_use]
    pub fn with_node_sink(mut self, sink: Option<Arc<dyn NodeMetricsSink>>) -> Self {
        self.node_sink = sink;
        self
    }

    /// Overrides the pipeline-metrics sink (`None` skips pipeline-sink
    /// emission entirely).
    #[must_use]
    pub fn with_pipeline_sink(mut self, sink: Option<Arc<dyn PipelineMetricsSink>>) -> Self {
        self.pipeline_sink = sink;
        self
    }

    /// Builds `definition`'s graph under `context`, runs it to completion,
    /// and emits the run's aggregate metrics to the configured sinks
    /// (spec.md §6, "Pipeline runner interface": `run<TDefinition>(context)
    /// → task`).
    ///
    /// `context` is caller-supplied rather than created internally so that
    /// host code can hold onto `context.cancellation` and cancel the run
    /// externally while it is in flight (spec.md §5 "Cancellation
    /// semantics").
    ///
    /// Returns [`RunError::Graph`]/[`RunError::Cancelled`] only for failures
    /// that mean the run never started at all (an invalid graph, or a
    /// context already cancelled before `run` was called). A node failure
    /// during execution is *not* an `Err` here: it is reported through
    /// [`RunOutcome::result`], alongside the [`PipelineMetricsSnapshot`] the
    /// failed run still produced (spec.md §7: "the pipeline metrics
    /// snapshot reflects this"). A failure emitting that snapshot to the
    /// configured sinks, however, *is* propagated as [`RunError::Metrics`]
    /// (spec.md §7: "Collector and sink errors during emitMetrics propagate
    /// to the caller") — in that case the snapshot was produced but never
    /// reached its sinks, and `RunOutcome` is not returned at all.
    pub async fn run<D: PipelineDefinition>(&self, definition: &D, context: &RunContext) -> Result<RunOutcome, RunError> {
        if context.cancellation.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let mut builder = GraphBuilder::new();
        definition.define(&mut builder, context)?;
        let graph: Graph = builder.build()?;

        let collector = Arc::new(MetricsCollector::new());
        let mut broadcast = BroadcastObserver::new();
        broadcast.push(Arc::new(MetricsCollectingExecutionObserver::new(Arc::clone(&collector))));
        if let Some(observer) = &self.observer {
            broadcast.push(Arc::clone(observer));
        }
        let observer: Arc<dyn ExecutionObserver> = Arc::new(broadcast);

        let start = Utc::now();
        let result = scheduler::run_graph(&graph, context, &collector, &observer).await;
        let end = Utc::now();

        let success = result.is_ok();
        let error_message = result.as_ref().err().map(ToString::to_string);

        collector
            .emit_metrics(
                &self.pipeline_name,
                &context.run_id,
                start,
                Some(end),
                success,
                error_message.clone(),
                self.node_sink.as_deref(),
                self.pipeline_sink.as_deref(),
                &context.cancellation,
            )
            .await?;

        let metrics = collector.create_pipeline_metrics(&self.pipeline_name, &context.run_id, start, Some(end), success, error_message);

        Ok(RunOutcome { metrics, result })
    }
}

/// The terminal state of one [`PipelineRunner::run`] call: the pipeline
/// metrics snapshot the run produced, paired with whether execution itself
/// succeeded.
#[derive(Debug)]
pub struct RunOutcome {
    /// The run's aggregate metrics, present whether or not the run
    /// succeeded.
    pub metrics: PipelineMetricsSnapshot,
    /// `Ok(())` if every node completed without failure; otherwise the
    /// first root failure observed across the run (spec.md §4.4-5, §7).
    pub result: Result<(), NodeExecutionError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::builder::{SinkHandle, SourceHandle};
    use crate::edge::OutputPort;
    use crate::node::{Sink, Source};

    struct CountingSource(u32);

    #[async_trait]
    impl Source<u32> for CountingSource {
        async fn run(
            &self,
            output: &OutputPort<u32>,
            _context: &RunContext,
            _cancellation: &CancellationToken,
        ) -> Result<(), NodeExecutionError> {
            for i in 0..self.0 {
                output.emit(i).await;
            }
            Ok(())
        }
    }

    struct CollectingSink {
        seen: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Sink<u32> for CollectingSink {
        async fn execute(&self, item: u32, _context: &RunContext, _cancellation: &CancellationToken) -> Result<(), NodeExecutionError> {
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    struct TwoNodeDefinition;

    impl PipelineDefinition for TwoNodeDefinition {
        fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), crate::error::GraphError> {
            let source: SourceHandle<u32> = builder.add_source("source", CountingSource(5))?;
            let sink: SinkHandle<u32> = builder.add_sink(
                "sink",
                CollectingSink {
                    seen: std::sync::Mutex::new(Vec::new()),
                },
            )?;
            builder.connect(&source, &sink)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_linear_pipeline_runs_to_success() {
        let runner = PipelineRunner::new("test-pipeline").with_node_sink(None).with_pipeline_sink(None);
        let outcome = runner.run(&TwoNodeDefinition, &RunContext::new()).await.unwrap();
        assert!(outcome.result.is_ok());
        assert!(outcome.metrics.success);
        assert_eq!(outcome.metrics.total_items_processed, 5);
    }
}
