// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Item-level retry (spec.md §4.6, `ItemRetry`): wraps a single
//! [`crate::node::Transform::execute`] call in a bounded exponential-backoff
//! retry loop.
//!
//! `NodeRestart` is the other `RetryKind` named by spec.md §6 but, per the
//! open question in spec.md §9 (resolved in `DESIGN.md`), nothing in this
//! crate ever emits it: there is no coarse-grained restart behaviour here,
//! only the per-item loop below.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::NodeExecutionError;
use crate::node::{Item, Transform, TransformError};
use crate::observer::{ExecutionObserver, RetryEvent, RetryKind};
use crate::policy::RetryPolicy;

/// The outcome of attempting an item through the retry loop.
pub(crate) enum RetryOutcome<O> {
    /// The transform eventually succeeded.
    Succeeded(O),
    /// Attempts were exhausted and `continue_on_error` is set: the item is
    /// dropped, processing continues.
    Dropped,
    /// Attempts were exhausted and `continue_on_error` is not set: this
    /// becomes the node's failure.
    Failed(NodeExecutionError),
}

/// Runs `item` through `transform.execute`, retrying on failure per
/// `policy` with exponential backoff (`base_delay_ms * 2^(attempt-1)`,
/// optionally jittered by a uniform multiplier in `[0.5, 1.5)`, per
/// `SPEC_FULL.md` A.7).
///
/// Observes `cancellation` at every backoff wait, returning early as soon
/// as it fires.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute_with_retry<I, O>(
    transform: &(dyn Transform<I, O> + '_),
    item: I,
    policy: &RetryPolicy,
    node_id: &Arc<str>,
    context: &RunContext,
    cancellation: &CancellationToken,
    observer: Option<&Arc<dyn ExecutionObserver>>,
) -> RetryOutcome<O>
where
    I: Item + Clone,
    O: Item,
{
    let mut attempt: u32 = 1;
    loop {
        tokio::select! {
            () = cancellation.cancelled() => {
                return RetryOutcome::Failed(NodeExecutionError::message(
                    node_id.to_string(),
                    "retry loop cancelled",
                ));
            }
            result = transform.execute(item.clone(), context, cancellation) => {
                match result {
                    Ok(output) => return RetryOutcome::Succeeded(output),
                    Err(error) => {
                        if attempt >= policy.max_attempts {
                            return give_up(policy, node_id, attempt, error);
                        }
                        if let Some(observer) = observer {
                            observer.on_retry(RetryEvent {
                                node_id: Arc::clone(node_id),
                                kind: RetryKind::ItemRetry,
                                attempt,
                                error: Some(error.to_string()),
                            });
                        }
                    }
                }
            }
        }

        let delay = jittered(policy.backoff_delay(attempt), policy.jitter);
        tokio::select! {
            () = cancellation.cancelled() => {
                return RetryOutcome::Failed(NodeExecutionError::message(
                    node_id.to_string(),
                    "retry backoff cancelled",
                ));
            }
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

fn give_up<O>(
    policy: &RetryPolicy,
    node_id: &Arc<str>,
    attempt: u32,
    error: TransformError,
) -> RetryOutcome<O> {
    tracing::warn!(node_id = %node_id, attempt, error = %error, "item retry attempts exhausted");
    if policy.continue_on_error {
        RetryOutcome::Dropped
    } else {
        RetryOutcome::Failed(NodeExecutionError {
            node_id: node_id.to_string(),
            cause: error.0,
        })
    }
}

fn jittered(delay: Duration, jitter: bool) -> Duration {
    if !jitter || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransform {
        fail_first_n: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transform<u32, u32> for FlakyTransform {
        async fn execute(
            &self,
            item: u32,
            _context: &RunContext,
            _cancellation: &CancellationToken,
        ) -> Result<u32, TransformError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first_n {
                Err(TransformError::message("not yet"))
            } else {
                Ok(item * 2)
            }
        }
    }

    #[tokio::test]
    async fn succeeds_after_configured_failures() {
        let transform = FlakyTransform { fail_first_n: 2, calls: AtomicU32::new(0) };
        let policy = RetryPolicy { jitter: false, ..RetryPolicy::exponential(3, 1) };
        let node_id: Arc<str> = Arc::from("t1");
        let context = RunContext::new();
        let outcome = execute_with_retry(
            &transform,
            5u32,
            &policy,
            &node_id,
            &context,
            &context.cancellation,
            None,
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Succeeded(10)));
    }

    #[tokio::test]
    async fn gives_up_as_a_node_failure_by_default() {
        let transform = FlakyTransform { fail_first_n: 10, calls: AtomicU32::new(0) };
        let policy = RetryPolicy { jitter: false, ..RetryPolicy::exponential(2, 1) };
        let node_id: Arc<str> = Arc::from("t1");
        let context = RunContext::new();
        let outcome = execute_with_retry(
            &transform,
            1u32,
            &policy,
            &node_id,
            &context,
            &context.cancellation,
            None,
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn continue_on_error_drops_instead_of_failing() {
        let transform = FlakyTransform { fail_first_n: 10, calls: AtomicU32::new(0) };
        let policy = RetryPolicy { jitter: false, ..RetryPolicy::exponential(2, 1).continue_on_error(true) };
        let node_id: Arc<str> = Arc::from("t1");
        let context = RunContext::new();
        let outcome = execute_with_retry(
            &transform,
            1u32,
            &policy,
            &node_id,
            &context,
            &context.cancellation,
            None,
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Dropped));
    }
}
