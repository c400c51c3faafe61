// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy of the pipeline runtime (spec.md §7).
//!
//! `GraphError` covers everything the builder can reject before a run ever
//! starts; `NodeExecutionError` is the single shape every run failure is
//! reported through, carrying the id of the node that failed and the
//! underlying cause. `BackpressureDropError` is informational only: it is
//! never returned from a fallible operation, only delivered through
//! [`crate::observer::ExecutionObserver::on_drop`].

use std::fmt;
use std::sync::Arc;

use flowgraph_telemetry::EmitError;

use crate::policy::DropKind;

/// Errors the graph builder can reject a definition with (spec.md §4.2, §7).
#[derive(thiserror::Error, Debug, Clone)]
pub enum GraphError {
    /// A node id was empty, or reused by a second node.
    #[error("node id `{id}` is {reason}")]
    InvalidNodeId {
        /// The offending id.
        id: String,
        /// Why the id was rejected.
        reason: &'static str,
    },

    /// `connect` was asked to join ports whose item types do not match.
    #[error(
        "type mismatch connecting `{producer}` ({producer_type}) to `{consumer}` ({consumer_type})"
    )]
    TypeMismatch {
        /// The producing node.
        producer: String,
        /// The producer's output type name.
        producer_type: &'static str,
        /// The consuming node.
        consumer: String,
        /// The consumer's input type name.
        consumer_type: &'static str,
    },

    /// A node already has an outgoing edge and cannot accept a second one:
    /// every node's single output port is used by at most one edge.
    #[error("node `{0}` already has an outgoing edge")]
    OutputAlreadyConnected(String),

    /// A node already has an incoming edge and cannot accept a second one.
    #[error("node `{0}` already has an incoming edge")]
    InputAlreadyConnected(String),

    /// `build` was called on a graph containing at least one cycle.
    #[error("graph contains a cycle reachable from node `{0}`")]
    Cycle(String),

    /// A node that is not a Source has no incoming edge, or a node that is
    /// not a Sink has no outgoing edge.
    #[error("node `{node}` is missing its required {port} edge")]
    DanglingPort {
        /// The offending node.
        node: String,
        /// Which side is missing: `"input"` or `"output"`.
        port: &'static str,
    },

    /// A non-Source node has no path back to any Source, or a non-Sink node
    /// has no path forward to any Sink.
    #[error("node `{node}` is not reachable {direction}")]
    Unreachable {
        /// The offending node.
        node: String,
        /// `"from any source"` or `"to any sink"`.
        direction: &'static str,
    },

    /// `build` was called with zero nodes registered.
    #[error("a graph must contain at least one node")]
    EmptyGraph,
}

/// The cause an item-level retry finally gave up on, or a node-level
/// failure not tied to a single item (e.g. a Source that failed to
/// initialize).
pub type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A node's user code failed after its retry budget (if any) was exhausted
/// (spec.md §7). This is the one shape every `PipelineRunner::run` failure
/// surfaces as; the cause chain is the first root failure observed across
/// the whole run (spec.md §4.4-5).
#[derive(Debug, Clone, thiserror::Error)]
#[error("node `{node_id}` failed: {cause}")]
pub struct NodeExecutionError {
    /// The id of the node whose execution failed.
    pub node_id: String,
    /// The underlying cause.
    pub cause: BoxedCause,
}

impl NodeExecutionError {
    /// Builds a `NodeExecutionError` from a node id and an arbitrary cause.
    pub fn new(node_id: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        NodeExecutionError {
            node_id: node_id.into(),
            cause: Arc::new(cause),
        }
    }

    /// Builds a `NodeExecutionError` from a node id and a plain message.
    #[must_use]
    pub fn message(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        NodeExecutionError {
            node_id: node_id.into(),
            cause: Arc::new(PlainError(message.into())),
        }
    }
}

/// A plain string error, for transforms/sinks/sources that want to fail
/// with just a message rather than a structured error type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct PlainError(pub String);

/// Informational record of a queue drop (spec.md §4.5, §7). Never
/// returned from a fallible operation; surfaced only through
/// [`crate::observer::ExecutionObserver::on_drop`]. Kept as a type (rather
/// than inlining its fields into the observer event) so sinks and tests can
/// pattern-match on it independently of the rest of the event payload.
#[derive(Debug, Clone)]
pub struct BackpressureDropError {
    /// The node whose input edge dropped an item.
    pub node_id: String,
    /// Which drop policy was in effect.
    pub kind: DropKind,
}

impl fmt::Display for BackpressureDropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node `{}` dropped an item ({:?})", self.node_id, self.kind)
    }
}

/// The top-level error returned by [`crate::runner::PipelineRunner::run`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    /// The graph failed to build; the run never started.
    #[error("graph build failed: {0}")]
    Graph(#[from] GraphError),

    /// A node failed during execution.
    #[error(transparent)]
    Node(#[from] NodeExecutionError),

    /// The run was cancelled externally before it completed.
    #[error("run was cancelled")]
    Cancelled,

    /// A metrics sink failed while emitting the run's terminal metrics
    /// (spec.md §7: "Collector and sink errors during emitMetrics
    /// propagate to the caller").
    #[error("metrics emission failed: {0}")]
    Metrics(#[from] EmitError),
}
