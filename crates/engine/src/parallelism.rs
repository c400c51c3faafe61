// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-edge parallelism / backpressure layer (spec.md §4.5): turns a
//! Transform's per-item `execute` into a pool of up to
//! `max_degree_of_parallelism` concurrent workers draining a single bounded
//! input edge.
//!
//! Workers "claim" items from the input pipe one at a time under a small
//! async mutex so the sequence number assigned to each item exactly matches
//! the order it was popped in (spec.md §4.5, §9: "a small pending-output
//! window"); the expensive `execute` call itself then runs outside that
//! lock, so true concurrency still happens for the per-item work. When
//! `preserve_order` is set, completed outputs are held in a small
//! claim-ordered buffer and released to the output edge strictly in input
//! order; otherwise they are released as soon as each worker finishes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flowgraph_channel::{Pipe, RecvOutcome};
use flowgraph_telemetry::NodeScope;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::edge::OutputPort;
use crate::error::NodeExecutionError;
use crate::node::{Item, Transform};
use crate::observer::ExecutionObserver;
use crate::policy::{ConcurrencyPolicy, RetryPolicy};
use crate::retry::{execute_with_retry, RetryOutcome};

struct Claimer<I> {
    pipe: Pipe<I>,
    lock: AsyncMutex<()>,
    next_seq: AtomicU64,
}

enum Claimed<I> {
    Item(u64, I),
    EndOfStream,
    Failed(flowgraph_channel::PipeFailure),
}

impl<I: Send + 'static> Claimer<I> {
    fn new(pipe: Pipe<I>) -> Self {
        Claimer {
            pipe,
            lock: AsyncMutex::new(()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Pops the next item (if any) and assigns it the sequence number
    /// matching its position in the original producer's enqueue order.
    ///
    /// Holding `lock` across the `await` serializes claim attempts across
    /// every worker, which is exactly what makes the sequence assignment
    /// below correct: only one worker can be mid-claim at a time, so the
    /// `fetch_add` immediately after a successful pop always lands in pop
    /// order.
    async fn claim(&self) -> Claimed<I> {
        let _guard = self.lock.lock().await;
        match self.pipe.recv().await {
            RecvOutcome::Item(item) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                Claimed::Item(seq, item)
            }
            RecvOutcome::EndOfStream => Claimed::EndOfStream,
            RecvOutcome::Failed(failure) => Claimed::Failed(failure),
        }
    }
}

struct ReorderBuffer<O> {
    next_to_release: u64,
    pending: BTreeMap<u64, O>,
}

/// Drains the input edge of a Transform node through a pool of up to
/// `annotation.concurrency.max_degree_of_parallelism` workers, each item
/// passed through the item-retry loop, writing results onward through
/// `output`.
///
/// Returns once the input edge reaches a terminal state and every worker
/// has drained in flight; never returns early just because one worker
/// exits — the input queue is shared, so workers exit together only once
/// the pipe itself is exhausted, failed or cancelled.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_transform_edge<I, O>(
    transform: Arc<dyn Transform<I, O>>,
    input: Pipe<I>,
    output: Arc<OutputPort<O>>,
    concurrency: ConcurrencyPolicy,
    retry: RetryPolicy,
    node_id: Arc<str>,
    context: RunContext,
    cancellation: CancellationToken,
    scope: Arc<NodeScope>,
    observer: Option<Arc<dyn ExecutionObserver>>,
) -> Result<(), NodeExecutionError>
where
    I: Item + Clone,
    O: Item,
{
    let claimer = Arc::new(Claimer::new(input));
    let worker_count = concurrency.max_degree_of_parallelism.max(1);
    let reorder = (concurrency.preserve_order && worker_count > 1).then(|| {
        Arc::new(SyncMutex::new(ReorderBuffer::<O> {
            next_to_release: 0,
            pending: BTreeMap::new(),
        }))
    });

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let claimer = Arc::clone(&claimer);
        let transform = Arc::clone(&transform);
        let output = Arc::clone(&output);
        let reorder = reorder.clone();
        let retry = retry;
        let node_id = Arc::clone(&node_id);
        let context = context.clone();
        let cancellation = cancellation.clone();
        let scope = Arc::clone(&scope);
        let observer = observer.clone();
        workers.push(tokio::spawn(async move {
            worker_loop(
                claimer, transform, output, reorder, retry, node_id, context, cancellation, scope, observer,
            )
            .await
        }));
    }

    let mut first_error = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => first_error.get_or_insert(error),
            Err(join_error) => first_error.get_or_insert(NodeExecutionError::message(
                node_id.to_string(),
                format!("worker task panicked: {join_error}"),
            )),
        };
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<I, O>(
    claimer: Arc<Claimer<I>>,
    transform: Arc<dyn Transform<I, O>>,
    output: Arc<OutputPort<O>>,
    reorder: Option<Arc<SyncMutex<ReorderBuffer<O>>>>,
    retry: RetryPolicy,
    node_id: Arc<str>,
    context: RunContext,
    cancellation: CancellationToken,
    scope: Arc<NodeScope>,
    observer: Option<Arc<dyn ExecutionObserver>>,
) -> Result<(), NodeExecutionError>
where
    I: Item + Clone,
    O: Item,
{
    loop {
        if cancellation.is_cancelled() {
            return Ok(());
        }
        let (seq, item) = match claimer.claim().await {
            Claimed::Item(seq, item) => (seq, item),
            Claimed::EndOfStream => return Ok(()),
            Claimed::Failed(failure) => {
                return Err(NodeExecutionError::new(node_id.to_string(), PipeFailureCause(failure)));
            }
        };

        scope.increment_processed();
        let outcome = execute_with_retry(
            transform.as_ref(),
            item,
            &retry,
            &node_id,
            &context,
            &cancellation,
            observer.as_ref(),
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded(result) => release(&reorder, &output, seq, result).await,
            RetryOutcome::Dropped => {
                advance_reorder_cursor(&reorder, &output, seq).await;
            }
            RetryOutcome::Failed(error) => {
                scope.record_failure(&error);
                return Err(error);
            }
        }
    }
}

/// Releases `result` to the output edge, honouring `preserve_order` if
/// configured: either immediately (no reorder buffer, or this item's `seq`
/// is next in line) or held until the items in front of it have released.
async fn release<O: Item>(
    reorder: &Option<Arc<SyncMutex<ReorderBuffer<O>>>>,
    output: &Arc<OutputPort<O>>,
    seq: u64,
    result: O,
) {
    let Some(reorder) = reorder else {
        let _ = output.emit(result).await;
        return;
    };
    let ready = {
        let mut state = reorder.lock();
        if seq == state.next_to_release {
            state.next_to_release += 1;
            let mut batch = vec![result];
            while let Some(next) = state.pending.remove(&state.next_to_release) {
                batch.push(next);
                state.next_to_release += 1;
            }
            batch
        } else {
            let _previous = state.pending.insert(seq, result);
            Vec::new()
        }
    };
    for item in ready {
        let _ = output.emit(item).await;
    }
}

/// A dropped item (retry exhausted with `continue_on_error`) still occupies
/// a sequence slot; advance the reorder cursor past it without emitting
/// anything, releasing whatever was already waiting behind it.
async fn advance_reorder_cursor<O: Item>(
    reorder: &Option<Arc<SyncMutex<ReorderBuffer<O>>>>,
    output: &Arc<OutputPort<O>>,
    seq: u64,
) {
    let Some(reorder) = reorder else {
        return;
    };
    let ready = {
        let mut state = reorder.lock();
        if seq != state.next_to_release {
            return;
        }
        state.next_to_release += 1;
        let mut batch = Vec::new();
        while let Some(next) = state.pending.remove(&state.next_to_release) {
            batch.push(next);
            state.next_to_release += 1;
        }
        batch
    };
    for item in ready {
        let _ = output.emit(item).await;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PipeFailureCause(flowgraph_channel::PipeFailure);

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowgraph_telemetry::{MetricsCollector, ObservabilityOptions};

    struct Double;

    #[async_trait]
    impl Transform<u32, u32> for Double {
        async fn execute(
            &self,
            item: u32,
            _context: &RunContext,
            _cancellation: &CancellationToken,
        ) -> Result<u32, crate::node::TransformError> {
            Ok(item * 2)
        }
    }

    fn test_output(capacity: usize) -> (Arc<OutputPort<u32>>, Pipe<u32>) {
        let pipe = Pipe::new(capacity);
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "out", ObservabilityOptions::default_preset()));
        (
            Arc::new(OutputPort::new(pipe.clone(), Arc::from("t"), ConcurrencyPolicy::default(), None, scope)),
            pipe,
        )
    }

    #[tokio::test]
    async fn single_worker_preserves_fifo() {
        let input = Pipe::new(16);
        for i in 0..8u32 {
            input.try_enqueue(i);
        }
        input.complete();
        let (output, output_pipe) = test_output(16);
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "t", ObservabilityOptions::default_preset()));
        let context = RunContext::new();
        run_transform_edge(
            Arc::new(Double),
            input,
            output,
            ConcurrencyPolicy::blocking(16),
            RetryPolicy::none(),
            Arc::from("t"),
            context.clone(),
            context.cancellation.clone(),
            scope,
            None,
        )
        .await
        .unwrap();
        output_pipe.complete();
        let mut stream = output_pipe.consume();
        let mut seen = Vec::new();
        while let Some(Ok(item)) = stream.next().await {
            seen.push(item);
        }
        assert_eq!(seen, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[tokio::test]
    async fn parallel_workers_with_preserve_order_restore_fifo() {
        let input = Pipe::new(32);
        for i in 0..20u32 {
            input.try_enqueue(i);
        }
        input.complete();
        let (output, output_pipe) = test_output(32);
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "t", ObservabilityOptions::default_preset()));
        let context = RunContext::new();
        run_transform_edge(
            Arc::new(Double),
            input,
            output,
            ConcurrencyPolicy::parallel(32, 4).with_preserve_order(true),
            RetryPolicy::none(),
            Arc::from("t"),
            context.clone(),
            context.cancellation.clone(),
            scope,
            None,
        )
        .await
        .unwrap();
        output_pipe.complete();
        let mut stream = output_pipe.consume();
        let mut seen = Vec::new();
        while let Some(Ok(item)) = stream.next().await {
            seen.push(item);
        }
        let expected: Vec<u32> = (0..20).map(|i| i * 2).collect();
        assert_eq!(seen, expected);
    }
}
