// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The data pipe: the bounded, single-producer/single-consumer primitive
//! every edge of a pipeline graph is built on top of.
//!
//! A [`Pipe`] is a lazy, ordered sequence of `T` with three ways to end:
//! completion (clean end-of-stream, drains whatever is already buffered),
//! failure (a terminal error, observed after any already-buffered items
//! drain), and cancellation (immediate end-of-stream, discards anything
//! still buffered and releases a suspended producer).
//!
//! This crate has no notion of nodes, graphs, retries or metrics; those
//! live in `flowgraph-engine` and `flowgraph-telemetry`, layered on top of
//! the primitives here.

mod error;
mod in_memory;
mod pipe;

pub use error::{PipeFailure, PipeFailureMessage};
pub use in_memory::InMemoryPipe;
pub use pipe::{EnqueueOutcome, Pipe, PipeStream, RecvOutcome, TryEnqueueOutcome};
