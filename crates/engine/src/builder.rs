// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The fluent graph builder (spec.md §4.2) and the immutable [`Graph`] it
//! produces.
//!
//! Node kinds are generic over their element types, but the builder itself
//! must hold a heterogeneous collection of them (spec.md §9, "type-generic
//! builder"): we erase each node behind the [`ErasedNode`] trait object at
//! `add_*` time, keeping the concrete `T`/`I`/`O` only inside the small
//! generic wrapper that implements it. Every [`NodeHandle`] still carries its
//! element type as a compile-time marker, so most callers never see the
//! erasure: `connect` is generic over `T` and the two handles passed to it
//! must agree on it, exactly as the design note asks ("keep type checks at
//! `connect` time").

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use flowgraph_channel::Pipe;
use flowgraph_telemetry::{NodeScope, ObservabilityOptions};
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::edge::OutputPort;
use crate::error::{GraphError, NodeExecutionError};
use crate::node::{Batch, Item, NodeKind, Sink, Source, Transform};
use crate::observer::ExecutionObserver;
use crate::policy::{ConcurrencyPolicy, RetryPolicy};
use crate::{batch, parallelism};

/// A type-erased handle to a pipe value, shared between the producing and
/// consuming node of one edge. Always actually a `Pipe<T>` for the edge's
/// element type `T`; downcast at the point where a concrete node knows `T`.
pub(crate) type AnyPipe = Arc<dyn Any + Send + Sync>;

fn downcast_pipe<T: Item>(pipe: AnyPipe) -> Pipe<T> {
    pipe.downcast_ref::<Pipe<T>>()
        .expect("edge pipe type was checked at connect() time")
        .clone()
}

/// The bundle of per-run wiring every node kind's [`ErasedNode::spawn`]
/// needs, independent of its element type.
pub(crate) struct SpawnArgs {
    pub node_id: Arc<str>,
    pub context: RunContext,
    pub cancellation: CancellationToken,
    pub scope: Arc<NodeScope>,
    pub observer: Option<Arc<dyn ExecutionObserver>>,
}

/// The type-erased node behaviour the scheduler drives. Implemented once per
/// concrete node kind (`SourceNode<T>`, `TransformNode<I, O>`, …); see the
/// `impl ErasedNode for ...` blocks below.
pub(crate) trait ErasedNode: Send + Sync {
    fn kind(&self) -> NodeKind;
    fn input_type(&self) -> Option<(TypeId, &'static str)>;
    fn output_type(&self) -> Option<(TypeId, &'static str)>;

    /// Allocates this node's outgoing edge pipe with the given bound
    /// (the downstream consumer's `max_queue_length`). `None` for Sink.
    fn allocate_output(&self, capacity: usize) -> Option<AnyPipe>;

    /// Spawns this node's task(s) for one run.
    ///
    /// `input` is the type-erased pipe shared with this node's producer
    /// (`None` for Source); `output` is this node's own outgoing pipe,
    /// already allocated by [`Self::allocate_output`] (`None` for Sink).
    /// `self_policy`/`self_retry` are this node's own annotation, governing
    /// how *it* consumes its input; `downstream_policy` is the next node's
    /// annotation, governing the [`OutputPort`] this node writes through.
    #[allow(clippy::too_many_arguments)]
    fn spawn(
        self: Arc<Self>,
        input: Option<AnyPipe>,
        output: Option<AnyPipe>,
        self_policy: ConcurrencyPolicy,
        self_retry: RetryPolicy,
        downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>>;
}

struct SourceNode<T: Item> {
    inner: Arc<dyn Source<T>>,
}

impl<T: Item> ErasedNode for SourceNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }
    fn input_type(&self) -> Option<(TypeId, &'static str)> {
        None
    }
    fn output_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<T>(), std::any::type_name::<T>()))
    }
    fn allocate_output(&self, capacity: usize) -> Option<AnyPipe> {
        Some(Arc::new(Pipe::<T>::new(capacity)))
    }

    fn spawn(
        self: Arc<Self>,
        _input: Option<AnyPipe>,
        output: Option<AnyPipe>,
        _self_policy: ConcurrencyPolicy,
        _self_retry: RetryPolicy,
        downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>> {
        let output_pipe = downcast_pipe::<T>(output.expect("Source always has an outgoing edge"));
        tokio::spawn(async move {
            let port = OutputPort::new(
                output_pipe.clone(),
                Arc::clone(&args.node_id),
                downstream_policy,
                args.observer.clone(),
                Arc::clone(&args.scope),
            );
            let result = self.inner.run(&port, &args.context, &args.cancellation).await;
            match &result {
                Ok(()) => output_pipe.complete(),
                Err(error) => output_pipe.fail(error.clone()),
            }
            result
        })
    }
}

struct TransformNode<I: Item + Clone, O: Item> {
    inner: Arc<dyn Transform<I, O>>,
}

impl<I: Item + Clone, O: Item> ErasedNode for TransformNode<I, O> {
    fn kind(&self) -> NodeKind {
        NodeKind::Transform
    }
    fn input_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<I>(), std::any::type_name::<I>()))
    }
    fn output_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<O>(), std::any::type_name::<O>()))
    }
    fn allocate_output(&self, capacity: usize) -> Option<AnyPipe> {
        Some(Arc::new(Pipe::<O>::new(capacity)))
    }

    fn spawn(
        self: Arc<Self>,
        input: Option<AnyPipe>,
        output: Option<AnyPipe>,
        self_policy: ConcurrencyPolicy,
        self_retry: RetryPolicy,
        downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>> {
        let input_pipe = downcast_pipe::<I>(input.expect("Transform always has an incoming edge"));
        let output_pipe = downcast_pipe::<O>(output.expect("Transform always has an outgoing edge"));
        tokio::spawn(async move {
            let port = Arc::new(OutputPort::new(
                output_pipe.clone(),
                Arc::clone(&args.node_id),
                downstream_policy,
                args.observer.clone(),
                Arc::clone(&args.scope),
            ));
            let result = parallelism::run_transform_edge(
                Arc::clone(&self.inner),
                input_pipe,
                port,
                self_policy,
                self_retry,
                Arc::clone(&args.node_id),
                args.context.clone(),
                args.cancellation.clone(),
                Arc::clone(&args.scope),
                args.observer.clone(),
            )
            .await;
            match &result {
                Ok(()) => output_pipe.complete(),
                Err(error) => output_pipe.fail(error.clone()),
            }
            result
        })
    }
}

struct SinkNode<T: Item> {
    inner: Arc<dyn Sink<T>>,
}

impl<T: Item> ErasedNode for SinkNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Sink
    }
    fn input_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<T>(), std::any::type_name::<T>()))
    }
    fn output_type(&self) -> Option<(TypeId, &'static str)> {
        None
    }
    fn allocate_output(&self, _capacity: usize) -> Option<AnyPipe> {
        None
    }

    fn spawn(
        self: Arc<Self>,
        input: Option<AnyPipe>,
        _output: Option<AnyPipe>,
        _self_policy: ConcurrencyPolicy,
        _self_retry: RetryPolicy,
        _downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>> {
        let input_pipe = downcast_pipe::<T>(input.expect("Sink always has an incoming edge"));
        tokio::spawn(async move {
            loop {
                if args.cancellation.is_cancelled() {
                    return Ok(());
                }
                match input_pipe.recv().await {
                    flowgraph_channel::RecvOutcome::Item(item) => {
                        args.scope.increment_processed();
                        self.inner.execute(item, &args.context, &args.cancellation).await?;
                    }
                    flowgraph_channel::RecvOutcome::EndOfStream => {
                        return self.inner.finish(&args.context).await;
                    }
                    flowgraph_channel::RecvOutcome::Failed(failure) => {
                        return Err(NodeExecutionError::new(args.node_id.to_string(), PipeFailureCause(failure)));
                    }
                }
            }
        })
    }
}

struct BatcherNode<T: Item> {
    max_size: usize,
    max_delay: Duration,
    _marker: PhantomData<fn(T)>,
}

impl<T: Item> ErasedNode for BatcherNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Batcher
    }
    fn input_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<T>(), std::any::type_name::<T>()))
    }
    fn output_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<Batch<T>>(), std::any::type_name::<Batch<T>>()))
    }
    fn allocate_output(&self, capacity: usize) -> Option<AnyPipe> {
        Some(Arc::new(Pipe::<Batch<T>>::new(capacity)))
    }

    fn spawn(
        self: Arc<Self>,
        input: Option<AnyPipe>,
        output: Option<AnyPipe>,
        _self_policy: ConcurrencyPolicy,
        _self_retry: RetryPolicy,
        downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>> {
        let input_pipe = downcast_pipe::<T>(input.expect("Batcher always has an incoming edge"));
        let output_pipe = downcast_pipe::<Batch<T>>(output.expect("Batcher always has an outgoing edge"));
        let max_size = self.max_size;
        let max_delay = self.max_delay;
        tokio::spawn(async move {
            let port = Arc::new(OutputPort::new(
                output_pipe.clone(),
                Arc::clone(&args.node_id),
                downstream_policy,
                args.observer.clone(),
                Arc::clone(&args.scope),
            ));
            let result = batch::run_batcher(
                input_pipe,
                port,
                max_size,
                max_delay,
                Arc::clone(&args.node_id),
                args.cancellation.clone(),
                Arc::clone(&args.scope),
            )
            .await;
            if let Err(error) = &result {
                output_pipe.fail(error.clone());
            }
            result
        })
    }
}

struct UnbatcherNode<T: Item> {
    _marker: PhantomData<fn(T)>,
}

impl<T: Item> ErasedNode for UnbatcherNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Unbatcher
    }
    fn input_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<Batch<T>>(), std::any::type_name::<Batch<T>>()))
    }
    fn output_type(&self) -> Option<(TypeId, &'static str)> {
        Some((TypeId::of::<T>(), std::any::type_name::<T>()))
    }
    fn allocate_output(&self, capacity: usize) -> Option<AnyPipe> {
        Some(Arc::new(Pipe::<T>::new(capacity)))
    }

    fn spawn(
        self: Arc<Self>,
        input: Option<AnyPipe>,
        output: Option<AnyPipe>,
        _self_policy: ConcurrencyPolicy,
        _self_retry: RetryPolicy,
        downstream_policy: ConcurrencyPolicy,
        args: SpawnArgs,
    ) -> tokio::task::JoinHandle<Result<(), NodeExecutionError>> {
        let input_pipe = downcast_pipe::<Batch<T>>(input.expect("Unbatcher always has an incoming edge"));
        let output_pipe = downcast_pipe::<T>(output.expect("Unbatcher always has an outgoing edge"));
        tokio::spawn(async move {
            let port = Arc::new(OutputPort::new(
                output_pipe.clone(),
                Arc::clone(&args.node_id),
                downstream_policy,
                args.observer.clone(),
                Arc::clone(&args.scope),
            ));
            let result = batch::run_unbatcher(
                input_pipe,
                port,
                Arc::clone(&args.node_id),
                args.cancellation.clone(),
                Arc::clone(&args.scope),
            )
            .await;
            if let Err(error) = &result {
                output_pipe.fail(error.clone());
            }
            result
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PipeFailureCause(flowgraph_channel::PipeFailure);

/// Something that can be named as the producer side of a [`GraphBuilder::connect`]
/// call: any handle whose node emits `T`.
pub trait OutputHandle<T: Item>: NodeHandle {}
/// Something that can be named as the consumer side of a [`GraphBuilder::connect`]
/// call: any handle whose node consumes `T`.
pub trait InputHandle<T: Item>: NodeHandle {}

/// Common behaviour of every node handle: its id, for the untyped annotation
/// and connection paths.
pub trait NodeHandle {
    /// The node id this handle refers to.
    fn id(&self) -> &Arc<str>;
}

macro_rules! node_handle {
    ($name:ident, $marker:ty) => {
        /// A handle to a registered node, bound to its element type(s).
        pub struct $name<T> {
            id: Arc<str>,
            _marker: PhantomData<$marker>,
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                $name {
                    id: Arc::clone(&self.id),
                    _marker: PhantomData,
                }
            }
        }

        impl<T> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).field("id", &self.id).finish()
            }
        }

        impl<T> NodeHandle for $name<T> {
            fn id(&self) -> &Arc<str> {
                &self.id
            }
        }
    };
}

node_handle!(SourceHandle, fn() -> T);
node_handle!(SinkHandle, fn(T));
node_handle!(BatcherHandle, fn(T) -> T);
node_handle!(UnbatcherHandle, fn(T) -> T);

/// A handle to a registered Transform node, bound to both its input and
/// output element types.
pub struct TransformHandle<I, O> {
    id: Arc<str>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for TransformHandle<I, O> {
    fn clone(&self) -> Self {
        TransformHandle {
            id: Arc::clone(&self.id),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for TransformHandle<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformHandle").field("id", &self.id).finish()
    }
}

impl<I, O> NodeHandle for TransformHandle<I, O> {
    fn id(&self) -> &Arc<str> {
        &self.id
    }
}

impl<T: Item> OutputHandle<T> for SourceHandle<T> {}
impl<I: Item, O: Item> OutputHandle<O> for TransformHandle<I, O> {}
impl<I: Item, O: Item> InputHandle<I> for TransformHandle<I, O> {}
impl<T: Item> InputHandle<T> for SinkHandle<T> {}
impl<T: Item> InputHandle<T> for BatcherHandle<T> {}
impl<T: Item> OutputHandle<Batch<T>> for BatcherHandle<T> {}
impl<T: Item> InputHandle<Batch<T>> for UnbatcherHandle<T> {}
impl<T: Item> OutputHandle<T> for UnbatcherHandle<T> {}

pub(crate) struct NodeRecord {
    pub(crate) kind: NodeKind,
    input_type: Option<(TypeId, &'static str)>,
    output_type: Option<(TypeId, &'static str)>,
    pub(crate) node: Arc<dyn ErasedNode>,
    pub(crate) concurrency: ConcurrencyPolicy,
    pub(crate) retry: RetryPolicy,
    pub(crate) observability: ObservabilityOptions,
    annotations: HashMap<String, Arc<dyn Any + Send + Sync>>,
    has_input_edge: bool,
    has_output_edge: bool,
}

/// Builds a [`Graph`] by registering nodes and the edges connecting them
/// (spec.md §4.2).
#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<Arc<str>, NodeRecord>,
    insertion_order: Vec<Arc<str>>,
    edges: Vec<(Arc<str>, Arc<str>)>,
}

impl GraphBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    fn register(
        &mut self,
        id: impl Into<String>,
        kind: NodeKind,
        input_type: Option<(TypeId, &'static str)>,
        output_type: Option<(TypeId, &'static str)>,
        node: Arc<dyn ErasedNode>,
    ) -> Result<Arc<str>, GraphError> {
        let id = id.into();
        if id.is_empty() {
            return Err(GraphError::InvalidNodeId { id, reason: "empty" });
        }
        let id: Arc<str> = Arc::from(id);
        if self.nodes.contains_key(&id) {
            return Err(GraphError::InvalidNodeId {
                id: id.to_string(),
                reason: "already registered",
            });
        }
        self.nodes.insert(
            Arc::clone(&id),
            NodeRecord {
                kind,
                input_type,
                output_type,
                node,
                concurrency: ConcurrencyPolicy::default(),
                retry: RetryPolicy::default(),
                observability: ObservabilityOptions::default(),
                annotations: HashMap::new(),
                has_input_edge: false,
                has_output_edge: false,
            },
        );
        self.insertion_order.push(Arc::clone(&id));
        Ok(id)
    }

    /// Registers a Source node emitting `T`.
    pub fn add_source<T, S>(&mut self, id: impl Into<String>, source: S) -> Result<SourceHandle<T>, GraphError>
    where
        T: Item,
        S: Source<T> + 'static,
    {
        let node: Arc<dyn ErasedNode> = Arc::new(SourceNode { inner: Arc::new(source) });
        let id = self.register(id, NodeKind::Source, None, Some((TypeId::of::<T>(), std::any::type_name::<T>())), node)?;
        Ok(SourceHandle { id, _marker: PhantomData })
    }

    /// Registers a Transform node mapping `I` to `O`.
    pub fn add_transform<I, O, X>(&mut self, id: impl Into<String>, transform: X) -> Result<TransformHandle<I, O>, GraphError>
    where
        I: Item + Clone,
        O: Item,
        X: Transform<I, O> + 'static,
    {
        let node: Arc<dyn ErasedNode> = Arc::new(TransformNode { inner: Arc::new(transform) });
        let id = self.register(
            id,
            NodeKind::Transform,
            Some((TypeId::of::<I>(), std::any::type_name::<I>())),
            Some((TypeId::of::<O>(), std::any::type_name::<O>())),
            node,
        )?;
        Ok(TransformHandle { id, _marker: PhantomData })
    }

    /// Registers a Sink node consuming `T`.
    pub fn add_sink<T, K>(&mut self, id: impl Into<String>, sink: K) -> Result<SinkHandle<T>, GraphError>
    where
        T: Item,
        K: Sink<T> + 'static,
    {
        let node: Arc<dyn ErasedNode> = Arc::new(SinkNode { inner: Arc::new(sink) });
        let id = self.register(id, NodeKind::Sink, Some((TypeId::of::<T>(), std::any::type_name::<T>())), None, node)?;
        Ok(SinkHandle { id, _marker: PhantomData })
    }

    /// Registers a Batcher node grouping `T` into batches of up to
    /// `max_size`, flushed after `max_delay` has elapsed since the first
    /// buffered item (`Duration::ZERO` disables the time-based flush).
    pub fn add_batcher<T: Item>(
        &mut self,
        id: impl Into<String>,
        max_size: usize,
        max_delay: Duration,
    ) -> Result<BatcherHandle<T>, GraphError> {
        let node: Arc<dyn ErasedNode> = Arc::new(BatcherNode::<T> {
            max_size,
            max_delay,
            _marker: PhantomData,
        });
        let id = self.register(
            id,
            NodeKind::Batcher,
            Some((TypeId::of::<T>(), std::any::type_name::<T>())),
            Some((TypeId::of::<Batch<T>>(), std::any::type_name::<Batch<T>>())),
            node,
        )?;
        Ok(BatcherHandle { id, _marker: PhantomData })
    }

    /// Registers an Unbatcher node flattening `Batch<T>` back into `T`.
    pub fn add_unbatcher<T: Item>(&mut self, id: impl Into<String>) -> Result<UnbatcherHandle<T>, GraphError> {
        let node: Arc<dyn ErasedNode> = Arc::new(UnbatcherNode::<T> { _marker: PhantomData });
        let id = self.register(
            id,
            NodeKind::Unbatcher,
            Some((TypeId::of::<Batch<T>>(), std::any::type_name::<Batch<T>>())),
            Some((TypeId::of::<T>(), std::any::type_name::<T>())),
            node,
        )?;
        Ok(UnbatcherHandle { id, _marker: PhantomData })
    }

    /// Connects `producer`'s output to `consumer`'s input. The element type
    /// `T` is shared by both handles at compile time; [`Self::connect_by_id`]
    /// performs the underlying runtime check spec.md §8 (property 2) calls
    /// out as a testable invariant.
    pub fn connect<T: Item>(&mut self, producer: &impl OutputHandle<T>, consumer: &impl InputHandle<T>) -> Result<(), GraphError> {
        self.connect_by_id(producer.id(), consumer.id())
    }

    /// The untyped form of [`Self::connect`]: looks up both nodes by id and
    /// checks their element types line up at runtime, failing with
    /// [`GraphError::TypeMismatch`] if not (spec.md §4.2, §8).
    pub fn connect_by_id(&mut self, producer_id: &str, consumer_id: &str) -> Result<(), GraphError> {
        let producer = self.nodes.get(producer_id).ok_or_else(|| GraphError::InvalidNodeId {
            id: producer_id.to_string(),
            reason: "not registered",
        })?;
        let consumer = self.nodes.get(consumer_id).ok_or_else(|| GraphError::InvalidNodeId {
            id: consumer_id.to_string(),
            reason: "not registered",
        })?;
        let (producer_type, producer_type_name) = producer
            .output_type
            .ok_or_else(|| GraphError::DanglingPort { node: producer_id.to_string(), port: "output" })?;
        let (consumer_type, consumer_type_name) = consumer
            .input_type
            .ok_or_else(|| GraphError::DanglingPort { node: consumer_id.to_string(), port: "input" })?;
        if producer_type != consumer_type {
            return Err(GraphError::TypeMismatch {
                producer: producer_id.to_string(),
                producer_type: producer_type_name,
                consumer: consumer_id.to_string(),
                consumer_type: consumer_type_name,
            });
        }
        if producer.has_output_edge {
            return Err(GraphError::OutputAlreadyConnected(producer_id.to_string()));
        }
        if consumer.has_input_edge {
            return Err(GraphError::InputAlreadyConnected(consumer_id.to_string()));
        }
        self.nodes.get_mut(producer_id).expect("checked above").has_output_edge = true;
        self.nodes.get_mut(consumer_id).expect("checked above").has_input_edge = true;
        self.edges.push((Arc::from(producer_id), Arc::from(consumer_id)));
        Ok(())
    }

    /// Sets the concurrency/backpressure annotation (spec.md §4.2
    /// `concurrency.policy`, §4.5) governing `handle`'s incoming edge.
    pub fn set_concurrency<T: Item>(&mut self, handle: &impl InputHandle<T>, policy: ConcurrencyPolicy) {
        if let Some(record) = self.nodes.get_mut(handle.id().as_ref()) {
            record.concurrency = policy;
        }
    }

    /// Sets the item-retry annotation (spec.md §4.2 `retry.policy`, §4.6)
    /// governing `handle`'s incoming edge. Only meaningful for a Transform.
    pub fn set_retry<T: Item>(&mut self, handle: &impl InputHandle<T>, policy: RetryPolicy) {
        if let Some(record) = self.nodes.get_mut(handle.id().as_ref()) {
            record.retry = policy;
        }
    }

    /// Sets the observability options (spec.md §4.2 `observability.options`,
    /// §4.9) governing `handle`'s own node scope.
    pub fn set_observability(&mut self, handle: &impl NodeHandle, options: ObservabilityOptions) {
        if let Some(record) = self.nodes.get_mut(handle.id().as_ref()) {
            record.observability = options;
        }
    }

    /// Attaches an arbitrary, forward-compatible annotation to a node
    /// (spec.md §4.2 `annotate(handle, key, value)`), beyond the three
    /// well-known typed keys above.
    pub fn annotate<V: Send + Sync + 'static>(&mut self, handle: &impl NodeHandle, key: impl Into<String>, value: V) {
        if let Some(record) = self.nodes.get_mut(handle.id().as_ref()) {
            let _previous = record.annotations.insert(key.into(), Arc::new(value));
        }
    }

    /// Reads back an annotation previously set with [`Self::annotate`].
    #[must_use]
    pub fn get_annotation<V: Send + Sync + 'static>(&self, handle: &impl NodeHandle, key: &str) -> Option<Arc<V>> {
        self.nodes
            .get(handle.id().as_ref())?
            .annotations
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<V>().ok())
    }

    /// Validates and freezes the graph (spec.md §3, §4.2).
    ///
    /// Because every node has at most one incoming and one outgoing edge,
    /// a valid graph is necessarily a disjoint union of simple chains, each
    /// starting at a Source and ending at a Sink; `build` both proves this
    /// structure holds and records each chain in execution order.
    pub fn build(self) -> Result<Graph, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        for id in &self.insertion_order {
            let record = &self.nodes[id];
            let needs_input = !matches!(record.kind, NodeKind::Source);
            let needs_output = !matches!(record.kind, NodeKind::Sink);
            if needs_input && !record.has_input_edge {
                return Err(GraphError::DanglingPort { node: id.to_string(), port: "input" });
            }
            if needs_output && !record.has_output_edge {
                return Err(GraphError::DanglingPort { node: id.to_string(), port: "output" });
            }
        }

        let forward: HashMap<Arc<str>, Arc<str>> = self.edges.iter().map(|(p, c)| (Arc::clone(p), Arc::clone(c))).collect();

        let mut visited: std::collections::HashSet<Arc<str>> = std::collections::HashSet::new();
        let mut chains: Vec<Vec<Arc<str>>> = Vec::new();
        for id in &self.insertion_order {
            if self.nodes[id].kind != NodeKind::Source {
                continue;
            }
            let mut chain = vec![Arc::clone(id)];
            let mut current = Arc::clone(id);
            loop {
                match forward.get(&current) {
                    Some(next) => {
                        if chain.iter().any(|seen| seen == next) {
                            return Err(GraphError::Cycle(next.to_string()));
                        }
                        chain.push(Arc::clone(next));
                        current = Arc::clone(next);
                    }
                    None => break,
                }
            }
            for member in &chain {
                visited.insert(Arc::clone(member));
            }
            chains.push(chain);
        }

        for id in &self.insertion_order {
            if visited.contains(id) {
                continue;
            }
            // Unvisited nodes are either part of a cycle disconnected from
            // every Source, or genuinely unreachable from one.
            let mut seen = std::collections::HashSet::new();
            let mut current = Arc::clone(id);
            loop {
                if !seen.insert(Arc::clone(&current)) {
                    return Err(GraphError::Cycle(current.to_string()));
                }
                match forward.get(&current) {
                    Some(next) => current = Arc::clone(next),
                    None => break,
                }
            }
            return Err(GraphError::Unreachable {
                node: id.to_string(),
                direction: "from any source",
            });
        }

        Ok(Graph {
            nodes: self.nodes,
            chains,
        })
    }
}

/// An immutable, validated pipeline graph (spec.md §3). Produced once by
/// [`GraphBuilder::build`] and then reused across runs.
pub struct Graph {
    pub(crate) nodes: HashMap<Arc<str>, NodeRecord>,
    pub(crate) chains: Vec<Vec<Arc<str>>>,
}

impl Graph {
    /// Every node id in this graph, in the order they were registered.
    #[must_use]
    pub fn node_ids(&self) -> Vec<Arc<str>> {
        self.nodes.keys().cloned().collect()
    }

    /// The disjoint Source-to-Sink chains this graph is made of.
    #[must_use]
    pub(crate) fn chains(&self) -> &[Vec<Arc<str>>] {
        &self.chains
    }
}
