// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-run context: a generated run id, the root cancellation signal,
//! and a bag of arbitrary keyed values for user code (spec.md §3,
//! "Pipeline run").

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// A run's unique identifier, generated once per [`crate::runner::PipelineRunner::run`]
/// call.
pub type RunId = String;

/// Generates a fresh, globally unique run id.
#[must_use]
pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}

/// The context bag threaded through every node's `execute`/`run` call
/// (spec.md §3: "a context bag of arbitrary keyed values for user code").
///
/// Cheaply cloneable: every node task holds its own clone, all backed by the
/// same shared map and cancellation signal.
#[derive(Clone)]
pub struct RunContext {
    /// This run's generated id.
    pub run_id: RunId,
    /// The run's root cancellation signal (spec.md §4.4-7, §5). Every node
    /// task observes this at its suspension points and a `cancel()` call
    /// propagates to every node.
    pub cancellation: CancellationToken,
    values: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RunContext {
    /// Creates a fresh context with a new run id and cancellation token.
    #[must_use]
    pub fn new() -> Self {
        RunContext {
            run_id: new_run_id(),
            cancellation: CancellationToken::new(),
            values: Arc::new(DashMap::new()),
        }
    }

    /// Inserts a keyed value into the context bag, overwriting any previous
    /// value under the same key.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        let _previous = self.values.insert(key.into(), Arc::new(value));
    }

    /// Retrieves a keyed value, if present and of the requested type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.values.get(key).and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
    }

    /// A child context sharing this context's value bag but deriving a
    /// fresh child cancellation token (cancelling the child does not
    /// cancel the parent; cancelling the parent cancels the child). Used
    /// internally to give a per-node timeout annotation its own derived
    /// cancellation without affecting the rest of the run (spec.md §5,
    /// "Timeouts").
    #[must_use]
    pub fn child_cancellation(&self) -> CancellationToken {
        self.cancellation.child_token()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        RunContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_bag_round_trips_typed_values() {
        let ctx = RunContext::new();
        ctx.insert("k", 42i32);
        assert_eq!(*ctx.get::<i32>("k").unwrap(), 42);
        assert!(ctx.get::<String>("k").is_none());
    }

    #[test]
    fn run_ids_are_unique() {
        let a = RunContext::new();
        let b = RunContext::new();
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn child_cancellation_does_not_cancel_parent() {
        let ctx = RunContext::new();
        let child = ctx.child_cancellation();
        child.cancel();
        assert!(!ctx.cancellation.is_cancelled());
    }
}
