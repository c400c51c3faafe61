// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Failure carried by a pipe once it has been failed.

use std::fmt;
use std::sync::Arc;

/// The error a pipe was failed with, cloneable so every concurrent consumer
/// observes the same terminal cause.
#[derive(Clone)]
pub struct PipeFailure(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl PipeFailure {
    /// Wraps an arbitrary error as a pipe failure.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipeFailure(Arc::new(error))
    }

    /// Returns the underlying cause.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl<E> From<E> for PipeFailure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        PipeFailure::new(error)
    }
}

impl fmt::Debug for PipeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for PipeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A plain string failure, for callers that just want to fail a pipe with a
/// message rather than a structured error type.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct PipeFailureMessage(pub String);

impl PipeFailureMessage {
    /// Builds a [`PipeFailure`] from a message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> PipeFailure {
        PipeFailure::new(PipeFailureMessage(message.into()))
    }
}
