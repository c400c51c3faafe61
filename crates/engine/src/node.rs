// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Node kind contracts (spec.md §4.3): `Source`, `Transform`, `Sink`. The
//! `Batcher`/`Unbatcher` kinds (spec.md §4.7) are built into the graph
//! builder rather than user-implemented traits: their behaviour is fully
//! specified by `max_size`/`max_delay`, so there is nothing for user code to
//! supply beyond those two numbers.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::{NodeExecutionError, PlainError};

/// A type a Source, Transform or Sink can emit or consume: just
/// `Send + 'static`. Items are opaque to the core (spec.md §3).
pub trait Item: Send + 'static {}
impl<T: Send + 'static> Item for T {}

/// A Batcher's output element and an Unbatcher's input element: the
/// sequence-typed value carrying one flush's grouped items (spec.md §4.3,
/// §4.7).
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// The batched items, in the order they were buffered.
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    /// Wraps a vector of items as a batch.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Batch { items }
    }

    /// The number of elements in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this batch has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The distinguishing kind of a node (spec.md §3). Used for diagnostics and
/// the `node_type` field of observer events; the actual per-kind behaviour
/// lives in the `Source`/`Transform`/`Sink` trait impls and in
/// `crate::batch` for `Batcher`/`Unbatcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Produces items; no input.
    Source,
    /// Maps one item to one item.
    Transform,
    /// Consumes items; no output.
    Sink,
    /// Buffers items, emitting grouped batches.
    Batcher,
    /// Flattens batches back into individual items.
    Unbatcher,
}

impl NodeKind {
    /// A human-readable label, used as `node_type` in observer events.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            NodeKind::Source => "Source",
            NodeKind::Transform => "Transform",
            NodeKind::Sink => "Sink",
            NodeKind::Batcher => "Batcher",
            NodeKind::Unbatcher => "Unbatcher",
        }
    }
}

/// A node that produces items with no input (spec.md §4.3).
///
/// `run` drives the source's entire lifetime: it is handed the node's
/// output port and is responsible for calling [`crate::edge::OutputPort::emit`]
/// for every item it produces, then returning `Ok(())` on clean exhaustion.
/// The scheduler completes the output pipe once `run` returns; a source
/// does not call `complete` itself.
#[async_trait]
pub trait Source<T: Item>: Send + Sync {
    /// Produces items onto `output` until exhausted or cancelled.
    async fn run(
        &self,
        output: &crate::edge::OutputPort<T>,
        context: &RunContext,
        cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError>;
}

/// A node that maps one input item to one output item (spec.md §4.3).
///
/// Called once per item by the edge's parallelism layer (spec.md §4.5),
/// potentially from several worker tasks concurrently if the inbound edge's
/// [`crate::policy::ConcurrencyPolicy::max_degree_of_parallelism`] is
/// greater than one. Implementations should be pure with respect to state
/// they do not own, since call order and overlap are not guaranteed under
/// parallel execution.
#[async_trait]
pub trait Transform<I: Item + Clone, O: Item>: Send + Sync {
    /// Maps `item` to an output item, or fails (retried per the inbound
    /// edge's [`crate::policy::RetryPolicy`]).
    async fn execute(
        &self,
        item: I,
        context: &RunContext,
        cancellation: &CancellationToken,
    ) -> Result<O, TransformError>;
}

/// The error a [`Transform::execute`] call fails with: a boxed cause that
/// the retry layer wraps into a [`NodeExecutionError`] only once its budget
/// is exhausted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub std::sync::Arc<dyn std::error::Error + Send + Sync + 'static>);

impl TransformError {
    /// Wraps an arbitrary error as a transform failure.
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        TransformError(std::sync::Arc::new(error))
    }

    /// Wraps a plain message as a transform failure.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        TransformError(std::sync::Arc::new(PlainError(message.into())))
    }
}

/// A node that consumes items with no output (spec.md §4.3).
///
/// `execute` is called once per item, in the order the edge's single
/// sequential consumer task drains them (spec.md §4.5: the worker pool is
/// scoped to Transform edges only, so a Sink's input is always drained
/// sequentially). `finish` is called exactly once after the input pipe
/// reaches end-of-stream, before the sink's own scope closes.
#[async_trait]
pub trait Sink<T: Item>: Send + Sync {
    /// Consumes one item.
    async fn execute(
        &self,
        item: T,
        context: &RunContext,
        cancellation: &CancellationToken,
    ) -> Result<(), NodeExecutionError>;

    /// Called once after the input stream ends cleanly. The default
    /// implementation does nothing.
    async fn finish(&self, _context: &RunContext) -> Result<(), NodeExecutionError> {
        Ok(())
    }
}
