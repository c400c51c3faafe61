// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The concrete scenarios from spec.md §8, S1-S6.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flowgraph_engine::{
    Batch, BatcherHandle, ConcurrencyPolicy, DropEvent, DropKind, ExecutionObserver, GraphBuilder, GraphError, NodeExecutionError,
    PipelineDefinition, PipelineRunner, RetryEvent, RetryPolicy, RunContext, Sink, SinkHandle, Source, SourceHandle, Transform,
    TransformError, TransformHandle, UnbatcherHandle,
};

struct VecSource<T: Clone + Send + Sync + 'static>(Vec<T>);

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Source<T> for VecSource<T> {
    async fn run(
        &self,
        output: &flowgraph_engine::OutputPort<T>,
        _context: &RunContext,
        _cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError> {
        for item in self.0.clone() {
            output.emit(item).await;
        }
        Ok(())
    }
}

struct Doubler;

#[async_trait]
impl Transform<u64, u64> for Doubler {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<u64, TransformError> {
        Ok(item * 2)
    }
}

struct SummingSink {
    total: Arc<std::sync::atomic::AtomicU64>,
}

#[async_trait]
impl Sink<u64> for SummingSink {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<(), NodeExecutionError> {
        self.total.fetch_add(item, Ordering::SeqCst);
        Ok(())
    }
}

// ---- S1: linear pipeline, 10 items ----

struct S1Definition {
    total: Arc<AtomicU64>,
}

impl PipelineDefinition for S1Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource((1..=10u64).collect()))?;
        let transform: TransformHandle<u64, u64> = builder.add_transform("transform", Doubler)?;
        let sink: SinkHandle<u64> = builder.add_sink("sink", SummingSink { total: Arc::clone(&self.total) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s1_linear_pipeline_sums_to_110() {
    let total = Arc::new(AtomicU64::new(0));
    let definition = S1Definition { total: Arc::clone(&total) };
    let runner = PipelineRunner::new("s1").with_node_sink(None).with_pipeline_sink(None);
    let outcome = runner.run(&definition, &RunContext::new()).await.unwrap();

    assert!(outcome.result.is_ok());
    assert!(outcome.metrics.success);
    assert_eq!(total.load(Ordering::SeqCst), 110);
    for node in &outcome.metrics.node_metrics {
        assert_eq!(node.items_processed, 10, "node {} processed", node.node_id);
        assert_eq!(node.items_emitted, 10, "node {} emitted", node.node_id);
    }
}

// ---- S2: batch round-trip ----

struct CollectingSink<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Sink<T> for CollectingSink<T> {
    async fn execute(&self, item: T, _context: &RunContext, _cancellation: &CancellationToken) -> Result<(), NodeExecutionError> {
        self.seen.lock().unwrap().push(item);
        Ok(())
    }
}

struct S2Definition {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl PipelineDefinition for S2Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource((1..=10u64).collect()))?;
        let batcher: BatcherHandle<u64> = builder.add_batcher("batcher", 5, Duration::ZERO)?;
        let unbatcher: UnbatcherHandle<u64> = builder.add_unbatcher("unbatcher")?;
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::clone(&self.seen) })?;
        builder.connect(&source, &batcher)?;
        builder.connect(&batcher, &unbatcher)?;
        builder.connect(&unbatcher, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s2_batch_round_trip_preserves_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let definition = S2Definition { seen: Arc::clone(&seen) };
    let runner = PipelineRunner::new("s2").with_node_sink(None).with_pipeline_sink(None);
    let outcome = runner.run(&definition, &RunContext::new()).await.unwrap();

    assert!(outcome.result.is_ok());
    assert_eq!(*seen.lock().unwrap(), (1..=10u64).collect::<Vec<_>>());

    let batcher = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "batcher").unwrap();
    assert_eq!(batcher.items_processed, 10);
    assert_eq!(batcher.items_emitted, 10);
    let unbatcher = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "unbatcher").unwrap();
    assert_eq!(unbatcher.items_processed, 10);
    assert_eq!(unbatcher.items_emitted, 10);
}

// ---- S3: mid-stream failure, no retries ----

struct FailOnFourth {
    calls: AtomicU32,
}

#[async_trait]
impl Transform<u64, u64> for FailOnFourth {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<u64, TransformError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 4 {
            Err(TransformError::message("boom on item 4"))
        } else {
            Ok(item)
        }
    }
}

struct S3Definition;

impl PipelineDefinition for S3Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource((1..=10u64).collect()))?;
        let transform: TransformHandle<u64, u64> = builder.add_transform("transform", FailOnFourth { calls: AtomicU32::new(0) })?;
        builder.set_retry(&transform, RetryPolicy::none());
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s3_mid_stream_failure_surfaces_as_node_execution_error() {
    let runner = PipelineRunner::new("s3").with_node_sink(None).with_pipeline_sink(None);
    let outcome = runner.run(&S3Definition, &RunContext::new()).await.unwrap();

    assert!(!outcome.metrics.success);
    let error = outcome.result.unwrap_err();
    assert_eq!(error.node_id, "transform");

    let transform = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "transform").unwrap();
    assert!(transform.items_processed >= 3 && transform.items_processed <= 10);
}

// ---- S4: retry eventually succeeds ----

/// Fails the first two attempts at any item divisible by 3, succeeds on the
/// third. Tracks attempts per item value rather than a shared call counter,
/// since a sequential run interleaves calls for every item in the stream.
struct FlakyEveryThird {
    attempts: Mutex<std::collections::HashMap<u64, u32>>,
}

#[async_trait]
impl Transform<u64, u64> for FlakyEveryThird {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<u64, TransformError> {
        if item % 3 != 0 {
            return Ok(item);
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(item).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempt < 3 {
            Err(TransformError::message("not yet"))
        } else {
            Ok(item)
        }
    }
}

struct S4Definition;

impl PipelineDefinition for S4Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource((1..=9u64).collect()))?;
        let transform: TransformHandle<u64, u64> =
            builder.add_transform("transform", FlakyEveryThird { attempts: Mutex::new(std::collections::HashMap::new()) })?;
        builder.set_retry(&transform, RetryPolicy { jitter: false, ..RetryPolicy::exponential(3, 1) });
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s4_retry_eventually_succeeds() {
    let runner = PipelineRunner::new("s4").with_node_sink(None).with_pipeline_sink(None);
    let outcome = runner.run(&S4Definition, &RunContext::new()).await.unwrap();

    assert!(outcome.result.is_ok());
    assert!(outcome.metrics.success);

    let source = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "source").unwrap();
    let sink = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "sink").unwrap();
    assert_eq!(source.items_emitted, sink.items_processed, "item conservation holds");
}

// ---- S5: drop-oldest under pressure ----

struct BurstSource(u32);

#[async_trait]
impl Source<u32> for BurstSource {
    async fn run(
        &self,
        output: &flowgraph_engine::OutputPort<u32>,
        _context: &RunContext,
        _cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError> {
        for i in 0..self.0 {
            output.emit(i).await;
        }
        Ok(())
    }
}

struct SlowTransform;

#[async_trait]
impl Transform<u32, u32> for SlowTransform {
    async fn execute(&self, item: u32, _context: &RunContext, _cancellation: &CancellationToken) -> Result<u32, TransformError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(item)
    }
}

#[derive(Default)]
struct DropObserver {
    drops: Mutex<Vec<DropKind>>,
}

impl ExecutionObserver for DropObserver {
    fn on_drop(&self, event: DropEvent) {
        self.drops.lock().unwrap().push(event.kind);
    }
}

struct S5Definition;

impl PipelineDefinition for S5Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u32> = builder.add_source("source", BurstSource(1000))?;
        let transform: TransformHandle<u32, u32> = builder.add_transform("transform", SlowTransform)?;
        builder.set_concurrency(
            &transform,
            ConcurrencyPolicy::parallel(5, 2).with_queue_policy(flowgraph_engine::QueuePolicy::DropOldest),
        );
        let sink: SinkHandle<u32> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s5_drop_oldest_under_pressure_conserves_items() {
    let observer = Arc::new(DropObserver::default());
    let runner = PipelineRunner::new("s5")
        .with_node_sink(None)
        .with_pipeline_sink(None)
        .with_observer(observer.clone() as Arc<dyn ExecutionObserver>);
    let outcome = runner.run(&S5Definition, &RunContext::new()).await.unwrap();

    assert!(outcome.result.is_ok());
    let sink = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "sink").unwrap();
    let source = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "source").unwrap();

    let drops = observer.drops.lock().unwrap();
    let total_dropped = drops.len() as u64;
    assert_eq!(sink.items_processed + total_dropped, source.items_emitted);
    assert!(drops.iter().any(|kind| *kind == DropKind::Oldest));
}

// ---- S6: cancellation mid-run ----

struct SlowCountingSource(u32);

#[async_trait]
impl Source<u32> for SlowCountingSource {
    async fn run(
        &self,
        output: &flowgraph_engine::OutputPort<u32>,
        _context: &RunContext,
        cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError> {
        for i in 0..self.0 {
            if cancellation.is_cancelled() {
                return Ok(());
            }
            output.emit(i).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

struct S6Definition;

impl PipelineDefinition for S6Definition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u32> = builder.add_source("source", SlowCountingSource(100))?;
        let sink: SinkHandle<u32> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn s6_cancellation_mid_run_terminates_within_bounded_time() {
    let runner = Arc::new(PipelineRunner::new("s6").with_node_sink(None).with_pipeline_sink(None));
    let context = RunContext::new();
    let run = tokio::spawn({
        let runner = Arc::clone(&runner);
        let context = context.clone();
        async move { runner.run(&S6Definition, &context).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    context.cancellation.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should terminate within bounded time")
        .unwrap()
        .unwrap();

    assert!(outcome.metrics.node_metrics.iter().any(|n| n.items_processed < 100));
}

// ---- Universal invariant: retryCount equals the maximum attempt observed ----

#[derive(Default)]
struct RetryRecordingObserver {
    max_attempt: std::sync::atomic::AtomicU32,
}

impl ExecutionObserver for RetryRecordingObserver {
    fn on_retry(&self, event: RetryEvent) {
        self.max_attempt.fetch_max(event.attempt, Ordering::SeqCst);
    }
}

struct RetryCountDefinition;

impl PipelineDefinition for RetryCountDefinition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource(vec![3u64]))?;
        let transform: TransformHandle<u64, u64> =
            builder.add_transform("transform", FlakyEveryThird { attempts: Mutex::new(std::collections::HashMap::new()) })?;
        builder.set_retry(&transform, RetryPolicy { jitter: false, ..RetryPolicy::exponential(5, 1) });
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

#[tokio::test]
async fn retry_count_equals_maximum_attempt_observed() {
    let observer = Arc::new(RetryRecordingObserver::default());
    let runner = PipelineRunner::new("retry-count")
        .with_node_sink(None)
        .with_pipeline_sink(None)
        .with_observer(observer.clone() as Arc<dyn ExecutionObserver>);
    let outcome = runner.run(&RetryCountDefinition, &RunContext::new()).await.unwrap();

    assert!(outcome.result.is_ok());
    let transform = outcome.metrics.node_metrics.iter().find(|n| &*n.node_id == "transform").unwrap();
    assert_eq!(u32::from(transform.retry_count), observer.max_attempt.load(Ordering::SeqCst));
}
