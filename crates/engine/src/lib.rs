// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The flowgraph pipeline runtime: a graph model, scheduler, and
//! parallelism/retry/observability layers for running item-at-a-time data
//! pipelines.
//!
//! A pipeline is declared by implementing [`PipelineDefinition`] against a
//! [`GraphBuilder`], then driven to completion with [`PipelineRunner`]
//! against a caller-supplied [`RunContext`] (hold onto its `cancellation`
//! token to cancel an in-flight run). See `SPEC_FULL.md` at the workspace
//! root for the full behavioural contract this crate implements.

mod batch;
mod builder;
mod context;
mod edge;
mod error;
mod metrics_observer;
mod node;
mod observer;
mod parallelism;
mod policy;
mod retry;
mod runner;
mod scheduler;

pub use builder::{
    BatcherHandle, Graph, GraphBuilder, InputHandle, NodeHandle, OutputHandle, SinkHandle, SourceHandle, TransformHandle, UnbatcherHandle,
};
pub use context::{new_run_id, RunContext, RunId};
pub use edge::{EmitOutcome, OutputPort};
pub use error::{BackpressureDropError, GraphError, NodeExecutionError, PlainError, RunError};
pub use flowgraph_telemetry::{
    EmitError, LoggingMetricsSink, NodeMetricsSink, NodeMetricsSnapshot, ObservabilityOptions, PipelineMetricsSink, PipelineMetricsSnapshot,
    SinkError,
};
pub use metrics_observer::MetricsCollectingExecutionObserver;
pub use node::{Batch, Item, NodeKind, Sink, Source, Transform, TransformError};
pub use observer::{
    BroadcastObserver, DropEvent, ExecutionObserver, NodeCompletedEvent, NodeStartedEvent, QueueMetricsEvent, RetryEvent, RetryKind,
};
pub use policy::{ConcurrencyPolicy, DropKind, QueuePolicy, RetryPolicy};
pub use runner::{PipelineDefinition, PipelineRunner, RunOutcome};
