// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The built-in Batcher and Unbatcher behaviours (spec.md §4.3, §4.7).
//!
//! Unlike Transform, neither kind goes through the parallelism layer's
//! worker pool (spec.md §4.5 scopes that to Transform edges only): each runs
//! as a single sequential task, so per-edge FIFO always holds for these two
//! kinds regardless of any annotated `max_degree_of_parallelism`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowgraph_channel::{Pipe, RecvOutcome};
use flowgraph_telemetry::NodeScope;
use tokio_util::sync::CancellationToken;

use crate::edge::OutputPort;
use crate::error::NodeExecutionError;
use crate::node::{Batch, Item};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PipeFailureCause(flowgraph_channel::PipeFailure);

/// Buffers items from `input` into batches of up to `max_size`, flushing
/// when the buffer is full, when `max_delay` has elapsed since the first
/// buffered item (unless `max_delay` is zero, which disables the time-based
/// flush), or when the input stream ends (flushing whatever remains).
pub(crate) async fn run_batcher<T: Item>(
    input: Pipe<T>,
    output: Arc<OutputPort<Batch<T>>>,
    max_size: usize,
    max_delay: Duration,
    node_id: Arc<str>,
    cancellation: CancellationToken,
    scope: Arc<NodeScope>,
) -> Result<(), NodeExecutionError> {
    let max_size = max_size.max(1);
    let mut buffer: Vec<T> = Vec::with_capacity(max_size);
    let mut first_item_at: Option<Instant> = None;

    loop {
        let deadline_wait = (!max_delay.is_zero())
            .then(|| first_item_at.map(|at| max_delay.saturating_sub(at.elapsed())))
            .flatten();

        tokio::select! {
            () = cancellation.cancelled() => {
                flush(&output, &mut buffer, &scope).await;
                return Ok(());
            }
            () = tokio::time::sleep(deadline_wait.unwrap_or(Duration::from_secs(86_400))), if deadline_wait.is_some() => {
                flush(&output, &mut buffer, &scope).await;
                first_item_at = None;
            }
            outcome = input.recv() => {
                match outcome {
                    RecvOutcome::Item(item) => {
                        scope.increment_processed();
                        if buffer.is_empty() {
                            first_item_at = Some(Instant::now());
                        }
                        buffer.push(item);
                        if buffer.len() >= max_size {
                            flush(&output, &mut buffer, &scope).await;
                            first_item_at = None;
                        }
                    }
                    RecvOutcome::EndOfStream => {
                        flush(&output, &mut buffer, &scope).await;
                        output.complete();
                        return Ok(());
                    }
                    RecvOutcome::Failed(failure) => {
                        return Err(NodeExecutionError::new(node_id.to_string(), PipeFailureCause(failure)));
                    }
                }
            }
        }
    }
}

async fn flush<T: Item>(output: &Arc<OutputPort<Batch<T>>>, buffer: &mut Vec<T>, scope: &Arc<NodeScope>) {
    if buffer.is_empty() {
        return;
    }
    let items = std::mem::take(buffer);
    let count = items.len() as u64;
    let _ = output.emit_counted(Batch::new(items), count).await;
    let _ = scope;
}

/// Flattens each input `Batch<T>` back into its individual elements, in
/// order, emitting them one at a time. End-of-stream on the input triggers
/// end-of-stream on the output once any buffered batch has fully drained.
pub(crate) async fn run_unbatcher<T: Item>(
    input: Pipe<Batch<T>>,
    output: Arc<OutputPort<T>>,
    node_id: Arc<str>,
    cancellation: CancellationToken,
    scope: Arc<NodeScope>,
) -> Result<(), NodeExecutionError> {
    loop {
        if cancellation.is_cancelled() {
            return Ok(());
        }
        tokio::select! {
            () = cancellation.cancelled() => return Ok(()),
            outcome = input.recv() => {
                match outcome {
                    RecvOutcome::Item(batch) => {
                        for item in batch.items {
                            scope.increment_processed();
                            let _ = output.emit(item).await;
                        }
                    }
                    RecvOutcome::EndOfStream => {
                        output.complete();
                        return Ok(());
                    }
                    RecvOutcome::Failed(failure) => {
                        return Err(NodeExecutionError::new(node_id.to_string(), PipeFailureCause(failure)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_telemetry::{MetricsCollector, ObservabilityOptions};

    use crate::policy::ConcurrencyPolicy;

    fn test_output<T: Item>(capacity: usize, node_id: &str) -> (Arc<OutputPort<T>>, Pipe<T>) {
        let pipe = Pipe::new(capacity);
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, node_id, ObservabilityOptions::default_preset()));
        (
            Arc::new(OutputPort::new(pipe.clone(), Arc::from(node_id), ConcurrencyPolicy::default(), None, scope)),
            pipe,
        )
    }

    #[tokio::test]
    async fn size_based_flush_emits_exactly_one_batch_per_threshold() {
        let input = Pipe::new(16);
        for i in 0..10u32 {
            input.try_enqueue(i);
        }
        input.complete();
        let (output, output_pipe) = test_output(16, "batcher");
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "batcher", ObservabilityOptions::default_preset()));
        run_batcher(
            input,
            output,
            5,
            Duration::ZERO,
            Arc::from("batcher"),
            CancellationToken::new(),
            scope,
        )
        .await
        .unwrap();
        output_pipe.complete();
        let mut stream = output_pipe.consume();
        let mut batches = Vec::new();
        while let Some(Ok(batch)) = stream.next().await {
            batches.push(batch.items);
        }
        assert_eq!(batches, vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8, 9]]);
    }

    #[tokio::test]
    async fn end_of_stream_flushes_a_partial_batch() {
        let input = Pipe::new(16);
        for i in 0..3u32 {
            input.try_enqueue(i);
        }
        input.complete();
        let (output, output_pipe) = test_output(16, "batcher");
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "batcher", ObservabilityOptions::default_preset()));
        run_batcher(
            input,
            output,
            10,
            Duration::ZERO,
            Arc::from("batcher"),
            CancellationToken::new(),
            scope,
        )
        .await
        .unwrap();
        output_pipe.complete();
        let mut stream = output_pipe.consume();
        assert_eq!(stream.next().await.unwrap().unwrap().items, vec![0, 1, 2]);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn time_based_flush_fires_before_size_threshold() {
        let input = Pipe::new(4);
        input.try_enqueue(1u32);
        let (output, output_pipe) = test_output(4, "batcher");
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "batcher", ObservabilityOptions::default_preset()));
        let cancellation = CancellationToken::new();
        let input_for_task = input.clone();
        let handle = tokio::spawn(run_batcher(
            input_for_task,
            output,
            100,
            Duration::from_millis(20),
            Arc::from("batcher"),
            cancellation.clone(),
            scope,
        ));
        let mut stream = output_pipe.consume();
        let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("time-based flush should fire")
            .unwrap()
            .unwrap();
        assert_eq!(first.items, vec![1]);
        input.complete();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unbatcher_flattens_batches_in_order() {
        let input = Pipe::new(4);
        input.try_enqueue(Batch::new(vec![1, 2, 3]));
        input.try_enqueue(Batch::new(vec![4, 5]));
        input.complete();
        let (output, output_pipe) = test_output(16, "unbatcher");
        let collector = Arc::new(MetricsCollector::new());
        let scope = Arc::new(NodeScope::open(collector, "unbatcher", ObservabilityOptions::default_preset()));
        run_unbatcher(input, output, Arc::from("unbatcher"), CancellationToken::new(), scope)
            .await
            .unwrap();
        output_pipe.complete();
        let mut stream = output_pipe.consume();
        let mut seen = Vec::new();
        while let Some(Ok(item)) = stream.next().await {
            seen.push(item);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
