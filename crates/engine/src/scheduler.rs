// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The scheduler (spec.md §4.4): wires a validated [`Graph`]'s pipes, spawns
//! every node's task, and drives completion/failure/cancellation
//! propagation across the whole run.
//!
//! Because the graph is a disjoint union of simple chains (see
//! [`crate::builder::GraphBuilder::build`]), wiring reduces to allocating
//! one pipe per adjacent pair in each chain and handing it to both sides as
//! an `output`/`input` pair — there is no general topological sort to do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use flowgraph_telemetry::{MetricsCollector, NodeScope};

use crate::builder::{AnyPipe, Graph};
use crate::context::RunContext;
use crate::error::NodeExecutionError;
use crate::observer::{ExecutionObserver, NodeCompletedEvent, NodeStartedEvent};
use crate::policy::ConcurrencyPolicy;

/// Runs every node in `graph` to completion under `context`, wiring edges,
/// emitting start/completion observer events, and propagating the first
/// observed failure per spec.md §4.4 points 4-6.
pub(crate) async fn run_graph(
    graph: &Graph,
    context: &RunContext,
    collector: &Arc<MetricsCollector>,
    observer: &Arc<dyn ExecutionObserver>,
) -> Result<(), NodeExecutionError> {
    let mut pipes: HashMap<Arc<str>, AnyPipe> = HashMap::new();
    for chain in graph.chains() {
        for pair in chain.windows(2) {
            let producer_id = &pair[0];
            let consumer_id = &pair[1];
            let capacity = graph
                .nodes
                .get(consumer_id.as_ref())
                .expect("chain member is always registered")
                .concurrency
                .max_queue_length;
            let producer = graph.nodes.get(producer_id.as_ref()).expect("chain member is always registered");
            let pipe = producer
                .node
                .allocate_output(capacity.max(1))
                .expect("a producer in a chain always has an outgoing edge");
            pipes.insert(Arc::clone(producer_id), pipe);
        }
    }

    let mut handles = Vec::new();
    for chain in graph.chains() {
        for (index, node_id) in chain.iter().enumerate() {
            let record = graph.nodes.get(node_id.as_ref()).expect("chain member is always registered");
            let input = if index == 0 {
                None
            } else {
                pipes.get(&chain[index - 1]).cloned()
            };
            let output = pipes.get(node_id).cloned();
            let downstream_policy = chain
                .get(index + 1)
                .and_then(|next_id| graph.nodes.get(next_id.as_ref()))
                .map_or(ConcurrencyPolicy::default(), |next| next.concurrency);

            let node_type = record.kind.label();
            let scope = Arc::new(NodeScope::open(Arc::clone(collector), node_id.as_ref(), record.observability));
            let args = crate::builder::SpawnArgs {
                node_id: Arc::clone(node_id),
                context: context.clone(),
                cancellation: context.cancellation.clone(),
                scope: Arc::clone(&scope),
                observer: Some(Arc::clone(observer)),
            };

            observer.on_node_started(NodeStartedEvent {
                node_id: Arc::clone(node_id),
                node_type,
                timestamp: Utc::now(),
            });

            let join_handle = Arc::clone(&record.node).spawn(
                input,
                output,
                record.concurrency,
                record.retry,
                downstream_policy,
                args,
            );

            let node_id = Arc::clone(node_id);
            let observer = Arc::clone(observer);
            let started_at = Instant::now();
            handles.push(tokio::spawn(async move {
                let outcome = match join_handle.await {
                    Ok(result) => result,
                    Err(join_error) => Err(NodeExecutionError::message(
                        node_id.to_string(),
                        format!("node task panicked: {join_error}"),
                    )),
                };
                if let Err(error) = &outcome {
                    scope.record_failure(error);
                }
                observer.on_node_completed(NodeCompletedEvent {
                    node_id: Arc::clone(&node_id),
                    node_type,
                    duration: started_at.elapsed(),
                    success: outcome.is_ok(),
                    error: outcome.clone().err(),
                });
                scope.finish(outcome.is_ok());
                outcome
            }));
        }
    }

    let mut first_error: Option<NodeExecutionError> = None;
    let mut pending = handles;
    while !pending.is_empty() {
        let (result, _index, remaining) = futures::future::select_all(pending).await;
        pending = remaining;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(join_error) => Err(NodeExecutionError::message("scheduler", format!("task panicked: {join_error}"))),
        };
        if let Err(error) = outcome {
            if first_error.is_none() {
                first_error = Some(error);
                context.cancellation.cancel();
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
