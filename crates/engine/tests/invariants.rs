// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Property-based checks for the universal invariants of spec.md §8, plus a
//! handful of deterministic checks for the invariants that don't benefit
//! from random inputs (cycle rejection, type safety at `connect`).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use flowgraph_engine::{
    BatcherHandle, GraphBuilder, NodeExecutionError, PipelineDefinition, PipelineRunner, RunContext, Sink, SinkHandle, Source,
    SourceHandle, Transform, TransformError, TransformHandle, UnbatcherHandle,
};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
}

struct VecSource(Vec<u64>);

#[async_trait]
impl Source<u64> for VecSource {
    async fn run(
        &self,
        output: &flowgraph_engine::OutputPort<u64>,
        _context: &RunContext,
        _cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError> {
        for item in self.0.iter().copied() {
            output.emit(item).await;
        }
        Ok(())
    }
}

struct Identity;

#[async_trait]
impl Transform<u64, u64> for Identity {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<u64, TransformError> {
        Ok(item)
    }
}

struct CollectingSink {
    seen: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Sink<u64> for CollectingSink {
    async fn execute(&self, item: u64, _context: &RunContext, _cancellation: &CancellationToken) -> Result<(), NodeExecutionError> {
        self.seen.lock().unwrap().push(item);
        Ok(())
    }
}

// ---- Property 3: per-edge FIFO with parallelism = 1 ----

struct FifoDefinition {
    items: Vec<u64>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl PipelineDefinition for FifoDefinition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), flowgraph_engine::GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource(self.items.clone()))?;
        let transform: TransformHandle<u64, u64> = builder.add_transform("transform", Identity)?;
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::clone(&self.seen) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fifo_preserved_at_parallelism_one(items in proptest::collection::vec(0u64..10_000, 0..40)) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let definition = FifoDefinition { items: items.clone(), seen: Arc::clone(&seen) };
        let runner = PipelineRunner::new("fifo-prop").with_node_sink(None).with_pipeline_sink(None);
        let outcome = block_on(runner.run(&definition, &RunContext::new())).unwrap();

        prop_assert!(outcome.result.is_ok());
        prop_assert_eq!(&*seen.lock().unwrap(), &items);
    }
}

// ---- Property 4: batch round-trip ----

struct BatchRoundTripDefinition {
    items: Vec<u64>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl PipelineDefinition for BatchRoundTripDefinition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), flowgraph_engine::GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource(self.items.clone()))?;
        // "delay = infinity": only size-based and end-of-stream flush apply.
        let batcher: BatcherHandle<u64> = builder.add_batcher("batcher", 7, Duration::from_secs(3600))?;
        let unbatcher: UnbatcherHandle<u64> = builder.add_unbatcher("unbatcher")?;
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::clone(&self.seen) })?;
        builder.connect(&source, &batcher)?;
        builder.connect(&batcher, &unbatcher)?;
        builder.connect(&unbatcher, &sink)?;
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn batch_round_trip_is_a_permutation_free_replay(items in proptest::collection::vec(0u64..10_000, 0..40)) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let definition = BatchRoundTripDefinition { items: items.clone(), seen: Arc::clone(&seen) };
        let runner = PipelineRunner::new("batch-prop").with_node_sink(None).with_pipeline_sink(None);
        let outcome = block_on(runner.run(&definition, &RunContext::new())).unwrap();

        prop_assert!(outcome.result.is_ok());
        prop_assert_eq!(&*seen.lock().unwrap(), &items);
    }
}

// ---- Property 5: item conservation without drops ----

struct ConservationDefinition {
    items: Vec<u64>,
}

impl PipelineDefinition for ConservationDefinition {
    fn define(&self, builder: &mut GraphBuilder, _context: &RunContext) -> Result<(), flowgraph_engine::GraphError> {
        let source: SourceHandle<u64> = builder.add_source("source", VecSource(self.items.clone()))?;
        let transform: TransformHandle<u64, u64> = builder.add_transform("transform", Identity)?;
        let sink: SinkHandle<u64> = builder.add_sink("sink", CollectingSink { seen: Arc::new(Mutex::new(Vec::new())) })?;
        builder.connect(&source, &transform)?;
        builder.connect(&transform, &sink)?;
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn item_counts_conserve_across_every_node_without_drops(items in proptest::collection::vec(0u64..10_000, 0..40)) {
        let len = items.len() as u64;
        let definition = ConservationDefinition { items };
        let runner = PipelineRunner::new("conservation-prop").with_node_sink(None).with_pipeline_sink(None);
        let outcome = block_on(runner.run(&definition, &RunContext::new())).unwrap();

        prop_assert!(outcome.result.is_ok());
        for node in &outcome.metrics.node_metrics {
            prop_assert_eq!(node.items_processed, len, "node {} items_processed", node.node_id);
            prop_assert_eq!(node.items_emitted, len, "node {} items_emitted", node.node_id);
        }
    }
}

// ---- Property 1: no cycles accepted ----

#[test]
fn build_rejects_a_self_loop() {
    let mut builder = GraphBuilder::new();
    let transform: TransformHandle<u64, u64> = builder.add_transform("t", Identity).unwrap();
    // A Transform's own output cannot legally feed its own input (a Source
    // is required upstream and a Sink downstream), so the only way to
    // construct a cycle through the public builder is two transforms
    // feeding each other; forming that wires a `TypeMismatch`-free loop
    // with no reachable Source, which `build` also rejects as a cycle.
    let other: TransformHandle<u64, u64> = builder.add_transform("u", Identity).unwrap();
    builder.connect(&transform, &other).unwrap();
    builder.connect(&other, &transform).unwrap();

    let error = builder.build().unwrap_err();
    assert!(matches!(error, flowgraph_engine::GraphError::Cycle(_)));
}

// ---- Property 2: type safety at connect ----

#[test]
fn connect_by_id_fails_on_mismatched_element_types() {
    let mut builder = GraphBuilder::new();
    let _source: SourceHandle<u64> = builder.add_source("source", VecSource(vec![1])).unwrap();
    let _sink: SinkHandle<u32> = builder
        .add_sink(
            "sink",
            StringlySink,
        )
        .unwrap();

    let error = builder.connect_by_id("source", "sink").unwrap_err();
    assert!(matches!(error, flowgraph_engine::GraphError::TypeMismatch { .. }));
}

struct StringlySink;

#[async_trait]
impl Sink<u32> for StringlySink {
    async fn execute(&self, _item: u32, _context: &RunContext, _cancellation: &CancellationToken) -> Result<(), NodeExecutionError> {
        Ok(())
    }
}
