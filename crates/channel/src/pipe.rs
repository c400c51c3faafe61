// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! `Pipe<T>`: a bounded, single-producer/single-consumer lazy sequence with
//! terminal completion, failure and cancellation.
//!
//! This is the base-layer channel every edge in the graph is built on top
//! of. It knows nothing about nodes, retries or observability; the engine
//! crate layers the per-edge concurrency policy (blocking, drop-oldest,
//! drop-newest) on top of the primitives exposed here.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::PipeFailure;

/// Outcome of a blocking [`Pipe::enqueue`].
#[derive(Debug)]
pub enum EnqueueOutcome<T> {
    /// The item was accepted into the pipe.
    Enqueued,
    /// The pipe had already reached a terminal state (completed, failed or
    /// cancelled); the item is handed back to the caller, un-enqueued.
    Dropped(T),
}

/// Outcome of a non-blocking [`Pipe::try_enqueue`].
#[derive(Debug)]
pub enum TryEnqueueOutcome<T> {
    /// The item was accepted into the pipe.
    Enqueued,
    /// The pipe is at capacity; the item is returned to the caller.
    Full(T),
    /// The pipe had already reached a terminal state; the item is returned.
    Closed(T),
}

/// Outcome of a [`Pipe::recv`].
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// The next item in FIFO order.
    Item(T),
    /// The pipe drained cleanly: it was completed (or cancelled) and no
    /// items remain buffered.
    EndOfStream,
    /// The pipe was failed and no more items will be delivered.
    Failed(PipeFailure),
}

struct Core<T> {
    buffer: VecDeque<T>,
    completed: bool,
    cancelled: bool,
    failure: Option<PipeFailure>,
}

struct Inner<T> {
    id: Option<Box<str>>,
    capacity: usize,
    core: Mutex<Core<T>>,
    item_ready: Notify,
    space_ready: Notify,
}

/// A bounded, single-producer/single-consumer data pipe over `T`.
///
/// Cheaply cloneable: every clone shares the same underlying buffer and
/// terminal state, so the producer side and the consumer side of an edge
/// each hold their own handle to the same `Pipe<T>`.
pub struct Pipe<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Pipe {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pipe<T> {
    /// Creates a new pipe with the given bounded capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a pipe must be able to hold at least
    /// one in-flight item.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_id(capacity, None)
    }

    /// Creates a new pipe, tagging it with an id used in diagnostics.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_id(capacity: usize, id: Option<String>) -> Self {
        assert!(capacity > 0, "pipe capacity must be at least 1");
        Pipe {
            inner: Arc::new(Inner {
                id: id.map(String::into_boxed_str),
                capacity,
                core: Mutex::new(Core {
                    buffer: VecDeque::with_capacity(capacity.min(64)),
                    completed: false,
                    cancelled: false,
                    failure: None,
                }),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    /// The diagnostic id given to this pipe, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.inner.id.as_deref()
    }

    /// The configured bound on the number of buffered-but-not-yet-consumed
    /// items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.core.lock().buffer.len()
    }

    /// Whether the pipe currently has no buffered items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pipe has reached a terminal state (completed, failed or
    /// cancelled) and will accept no further items.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let core = self.inner.core.lock();
        core.completed || core.cancelled || core.failure.is_some()
    }

    /// Whether the pipe was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.core.lock().cancelled
    }

    /// Offers an item to the pipe, suspending the caller while the pipe is
    /// at capacity.
    ///
    /// Returns [`EnqueueOutcome::Dropped`] instead of suspending forever if
    /// the pipe has already reached a terminal state; this is the "dropped"
    /// indication drop-policies and terminal producers rely on.
    pub async fn enqueue(&self, item: T) -> EnqueueOutcome<T> {
        let mut item = item;
        loop {
            match self.try_enqueue(item) {
                TryEnqueueOutcome::Enqueued => return EnqueueOutcome::Enqueued,
                TryEnqueueOutcome::Closed(returned) => return EnqueueOutcome::Dropped(returned),
                TryEnqueueOutcome::Full(returned) => {
                    item = returned;
                    self.inner.space_ready.notified().await;
                }
            }
        }
    }

    /// Non-blocking offer: never suspends.
    pub fn try_enqueue(&self, item: T) -> TryEnqueueOutcome<T> {
        let mut core = self.inner.core.lock();
        if core.completed || core.cancelled || core.failure.is_some() {
            return TryEnqueueOutcome::Closed(item);
        }
        if core.buffer.len() >= self.inner.capacity {
            return TryEnqueueOutcome::Full(item);
        }
        core.buffer.push_back(item);
        drop(core);
        self.inner.item_ready.notify_one();
        TryEnqueueOutcome::Enqueued
    }

    /// Forces an item into the pipe, evicting the oldest buffered item if
    /// the pipe is at capacity. Used by the `DropOldest` concurrency policy.
    ///
    /// Returns the evicted item, if the pipe was at capacity and still
    /// open. If the pipe has already reached a terminal state, the new item
    /// is itself the one dropped (returned back to the caller).
    pub fn enqueue_evicting_oldest(&self, item: T) -> Result<Option<T>, T> {
        let mut core = self.inner.core.lock();
        if core.completed || core.cancelled || core.failure.is_some() {
            return Err(item);
        }
        let evicted = if core.buffer.len() >= self.inner.capacity {
            core.buffer.pop_front()
        } else {
            None
        };
        core.buffer.push_back(item);
        drop(core);
        self.inner.item_ready.notify_one();
        Ok(evicted)
    }

    /// Marks the pipe as completed: no more items will be enqueued, but
    /// whatever is already buffered still drains normally. Idempotent.
    pub fn complete(&self) {
        let mut core = self.inner.core.lock();
        core.completed = true;
        drop(core);
        self.inner.item_ready.notify_waiters();
        self.inner.space_ready.notify_waiters();
    }

    /// Marks the pipe as failed with the given cause. The first call wins;
    /// subsequent calls are no-ops. Already-buffered items are still
    /// delivered to the consumer before the failure is observed.
    pub fn fail(&self, error: impl Into<PipeFailure>) {
        let mut core = self.inner.core.lock();
        if core.failure.is_none() {
            core.failure = Some(error.into());
        }
        drop(core);
        self.inner.item_ready.notify_waiters();
        self.inner.space_ready.notify_waiters();
    }

    /// Cancels the pipe: discards any buffered items, signals end-of-stream
    /// to the consumer and releases any suspended producer.
    pub fn cancel(&self) {
        let mut core = self.inner.core.lock();
        core.cancelled = true;
        core.buffer.clear();
        drop(core);
        self.inner.item_ready.notify_waiters();
        self.inner.space_ready.notify_waiters();
    }

    /// Consumes the next item from the pipe, suspending the caller while
    /// the pipe is empty and still open.
    pub async fn recv(&self) -> RecvOutcome<T> {
        loop {
            {
                let mut core = self.inner.core.lock();
                if let Some(item) = core.buffer.pop_front() {
                    drop(core);
                    self.inner.space_ready.notify_one();
                    return RecvOutcome::Item(item);
                }
                if core.cancelled {
                    return RecvOutcome::EndOfStream;
                }
                if let Some(failure) = core.failure.clone() {
                    return RecvOutcome::Failed(failure);
                }
                if core.completed {
                    return RecvOutcome::EndOfStream;
                }
            }
            self.inner.item_ready.notified().await;
        }
    }

    /// Returns a handle that yields the pipe's contents as a lazy, ordered
    /// sequence via repeated calls to [`PipeStream::next`].
    #[must_use]
    pub fn consume(&self) -> PipeStream<T> {
        PipeStream { pipe: self.clone() }
    }
}

/// A consuming view over a [`Pipe`], yielding items in FIFO order until the
/// pipe reaches a terminal state.
pub struct PipeStream<T> {
    pipe: Pipe<T>,
}

impl<T> PipeStream<T> {
    /// Pulls the next item, or `None` on clean end-of-stream, or `Some(Err)`
    /// if the pipe was failed.
    pub async fn next(&mut self) -> Option<Result<T, PipeFailure>> {
        match self.pipe.recv().await {
            RecvOutcome::Item(item) => Some(Ok(item)),
            RecvOutcome::EndOfStream => None,
            RecvOutcome::Failed(failure) => Some(Err(failure)),
        }
    }
}
