// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Observability subsystem: a thread-safe, sharded-by-node metrics
//! collector, a scoped per-node recording guard, and pluggable metrics
//! sinks (spec.md §4.8, §4.9).
//!
//! This crate knows nothing about graphs, edges or retries; `flowgraph-
//! engine` drives a [`NodeScope`] per node execution and wires an
//! [`ObservabilityOptions`] preset from its own node annotations.

mod collector;
mod node_metrics;
mod options;
mod pipeline_metrics;
mod scope;
mod sink;

pub use collector::{EmitError, MetricsCollector};
pub use node_metrics::NodeMetricsSnapshot;
pub use options::ObservabilityOptions;
pub use pipeline_metrics::PipelineMetricsSnapshot;
pub use scope::NodeScope;
pub use sink::{LoggingMetricsSink, NodeMetricsSink, PipelineMetricsSink, SinkError};
