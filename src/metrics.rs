//! Dispatch counters.
//!
//! Handler failures never propagate to the poll caller, so these cumulative
//! counters are the visibility the engine offers instead: every fired
//! deadline shows up in exactly one terminal counter (completed, panicked,
//! or disowned) in addition to `dispatched`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative dispatch counters, shared between the engine and its pool.
#[derive(Debug, Default)]
pub(crate) struct DispatchMetrics {
    /// Deadlines handed to the worker pool.
    dispatched: AtomicU64,
    /// Handler invocations that returned normally.
    completed: AtomicU64,
    /// Handler invocations that panicked while still owned.
    panicked: AtomicU64,
    /// Jobs abandoned after overrunning their timeout, or arriving after
    /// shutdown.
    disowned: AtomicU64,
}

impl DispatchMetrics {
    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disowned(&self) {
        self.disowned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            disowned: self.disowned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the dispatch counters.
///
/// Counters are read individually with relaxed ordering; a snapshot taken
/// while handlers are running may be torn across fields, but each field is
/// monotonically non-decreasing across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Deadlines handed to the worker pool.
    pub dispatched: u64,
    /// Handler invocations that returned normally.
    pub completed: u64,
    /// Handler invocations that panicked while still owned.
    pub panicked: u64,
    /// Jobs abandoned after overrunning their timeout, or arriving after
    /// shutdown.
    pub disowned: u64,
}
