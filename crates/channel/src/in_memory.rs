// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! [`InMemoryPipe`]: a pre-materialised, already-complete pipe, used to turn
//! a finite in-memory collection into a data pipe without any producer task.

use crate::pipe::{Pipe, TryEnqueueOutcome};

/// Builds a [`Pipe`] pre-loaded with every item of a finite collection,
/// already marked completed.
///
/// Useful for sources whose entire output is known up front (test fixtures,
/// replay of a captured batch, small static lookups) where spinning up a
/// producer task just to push items one at a time would be pure overhead.
pub struct InMemoryPipe;

impl InMemoryPipe {
    /// Materialises `items` into a new pipe sized exactly to hold them all,
    /// then marks the pipe completed. The returned pipe never blocks a
    /// consumer on production since every item is already buffered.
    #[must_use]
    pub fn from_vec<T>(items: Vec<T>) -> Pipe<T> {
        let capacity = items.len().max(1);
        let pipe = Pipe::new(capacity);
        for item in items {
            match pipe.try_enqueue(item) {
                TryEnqueueOutcome::Enqueued => {}
                TryEnqueueOutcome::Full(_) | TryEnqueueOutcome::Closed(_) => {
                    unreachable!("pipe is sized to hold every item and cannot be closed yet")
                }
            }
        }
        pipe.complete();
        pipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_in_original_order_then_ends() {
        let pipe = InMemoryPipe::from_vec(vec!["a", "b", "c"]);
        let mut stream = pipe.consume();
        let mut seen = Vec::new();
        while let Some(Ok(item)) = stream.next().await {
            seen.push(item);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_vec_yields_an_already_ended_pipe() {
        let pipe: Pipe<i32> = InMemoryPipe::from_vec(Vec::new());
        let mut stream = pipe.consume();
        assert!(stream.next().await.is_none());
    }
}
