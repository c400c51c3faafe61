// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Observability option flags: which recordings a node scope actually
//! performs.

use bitflags::bitflags;

bitflags! {
    /// Which categories of observability data a [`crate::NodeScope`] records.
    ///
    /// Gating recording behind these flags means a disabled category costs
    /// nothing beyond the flag check itself: no timestamp sampling, no
    /// thread-id formatting, no `memory-stats` syscall.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ObservabilityOptions: u8 {
        /// Record start/end timestamps and duration.
        const RECORD_TIMING = 0b0000_0001;
        /// Record items-processed and items-emitted counters.
        const RECORD_ITEM_COUNTS = 0b0000_0010;
        /// Sample process memory at scope open/close and record the delta.
        const RECORD_MEMORY_USAGE = 0b0000_0100;
        /// Record the OS thread id the node executed on.
        const RECORD_THREAD_INFO = 0b0000_1000;
        /// Compute and record throughput and average per-item time.
        const RECORD_PERFORMANCE_METRICS = 0b0001_0000;
    }
}

impl ObservabilityOptions {
    /// Timing, item counts, thread info and performance metrics; no memory
    /// sampling. The recommended default for production pipelines.
    #[must_use]
    pub const fn default_preset() -> Self {
        Self::RECORD_TIMING
            .union(Self::RECORD_ITEM_COUNTS)
            .union(Self::RECORD_THREAD_INFO)
            .union(Self::RECORD_PERFORMANCE_METRICS)
    }

    /// Every category, including memory sampling. Diagnostic use only: a
    /// `memory-stats` sample is a syscall per scope open and close.
    #[must_use]
    pub const fn full() -> Self {
        Self::all()
    }

    /// Timing only; the cheapest non-zero preset.
    #[must_use]
    pub const fn minimal() -> Self {
        Self::RECORD_TIMING
    }

    /// Nothing recorded. Scopes still guard node execution but the
    /// collector is never touched.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::empty()
    }
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self::default_preset()
    }
}
