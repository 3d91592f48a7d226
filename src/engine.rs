//! The deadline engine facade.
//!
//! [`DeadlineEngine`] composes the pending-deadline store and the dispatch
//! pool behind four operations: `schedule`, `cancel`, `poll`, and `size`.
//! Producers schedule future points in time and hold on to the returned id;
//! a polling loop periodically drains everything that has come due and hands
//! it to the worker pool; any thread may cancel a pending id.
//!
//! `poll` does its store work and its dispatch work in separate phases: due
//! keys are drained under the store's write lock, the lock is released, and
//! only then are jobs handed to the pool. Handlers never run under the lock.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, Handler};
use crate::error::ScheduleError;
use crate::key::DeadlineId;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::store::DeadlineStore;

/// A millisecond-deadline engine.
///
/// All methods take `&self`; the engine is shared across threads as-is or
/// behind an `Arc`. See the [crate docs](crate) for the full contract.
///
/// # Example
///
/// ```
/// use knell::DeadlineEngine;
///
/// let engine = DeadlineEngine::new();
/// let id = engine.schedule(1_000)?;
///
/// // Some time later, fire everything due by now.
/// let fired = engine.poll(2_000, |id| println!("expired: {id}"), 64)?;
/// assert_eq!(fired, 1);
/// assert!(!engine.cancel(id), "already fired");
/// # Ok::<(), knell::ScheduleError>(())
/// ```
pub struct DeadlineEngine {
    store: DeadlineStore,
    dispatcher: Dispatcher,
    metrics: Arc<DispatchMetrics>,
}

impl DeadlineEngine {
    /// Creates an engine with the default [`EngineConfig`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn with_config(mut config: EngineConfig) -> Self {
        config.normalize();
        let metrics = Arc::new(DispatchMetrics::default());
        let dispatcher = Dispatcher::new(&config, Arc::clone(&metrics));
        tracing::debug!(
            workers = config.worker_threads,
            handler_timeout = ?config.handler_timeout,
            "deadline engine started"
        );
        Self {
            store: DeadlineStore::new(),
            dispatcher,
            metrics,
        }
    }

    /// Registers a deadline at `deadline_ms` (milliseconds since the Unix
    /// epoch) and returns its id.
    ///
    /// The id is the packed key itself and is the sole handle for
    /// [`cancel`](Self::cancel). Scheduling in the past is allowed; the
    /// entry is simply due on the next poll.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::HorizonExceeded`] if `deadline_ms` does not fit the
    /// key's time field, [`ScheduleError::SlotsExhausted`] if the
    /// millisecond already holds its maximum number of deadlines. The store
    /// is untouched in both cases.
    pub fn schedule(&self, deadline_ms: u64) -> Result<DeadlineId, ScheduleError> {
        let id = self.store.insert_for_time(deadline_ms)?;
        tracing::trace!(id = %id, deadline_ms, "deadline scheduled");
        Ok(id)
    }

    /// Removes a pending deadline.
    ///
    /// Returns `true` if `id` was pending and is now removed, `false` if it
    /// was unknown, already cancelled, or already fired. A deadline that has
    /// been handed to the dispatch pool can no longer be retracted.
    pub fn cancel(&self, id: DeadlineId) -> bool {
        let removed = self.store.remove(id);
        tracing::trace!(id = %id, removed, "deadline cancelled");
        removed
    }

    /// Fires every deadline due at `now_ms`, up to `max_poll` of them.
    ///
    /// Entries with time at or before `now_ms` are removed from the store in
    /// ascending key order and handed to the worker pool; entries with a
    /// later time are never touched. Entries beyond `max_poll` stay pending
    /// for a future call. The return value counts deadlines dispatched, not
    /// handlers completed: a handler that later panics or overruns its
    /// timeout is contained by the pool and visible only through
    /// [`metrics`](Self::metrics) and the log.
    ///
    /// The firing order of concurrently due deadlines is unspecified.
    ///
    /// After [`shutdown`](Self::shutdown) nothing is drained and the call
    /// returns `Ok(0)`. A poll racing the shutdown may still drain entries;
    /// those are counted disowned rather than run.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::HorizonExceeded`] if `now_ms` itself is beyond the
    /// representable horizon.
    pub fn poll<F>(&self, now_ms: u64, handler: F, max_poll: usize) -> Result<usize, ScheduleError>
    where
        F: Fn(DeadlineId) + Send + Sync + 'static,
    {
        if self.dispatcher.is_shutdown() {
            tracing::warn!(now_ms, "poll on a shut down engine; nothing dispatched");
            return Ok(0);
        }

        let due = self.store.take_due(now_ms, max_poll)?;
        if due.is_empty() {
            return Ok(0);
        }

        let handler: Handler = Arc::new(handler);
        let count = due.len();
        tracing::debug!(count, now_ms, "dispatching due deadlines");
        for id in due {
            self.dispatcher.dispatch(id, Arc::clone(&handler));
        }
        Ok(count)
    }

    /// Number of pending deadlines.
    #[must_use]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Cumulative dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops the dispatch pool and waits up to `timeout` for in-flight and
    /// queued handlers to finish.
    ///
    /// Returns `true` on a clean drain, `false` if the timeout elapsed
    /// first. Pending deadlines remain in the store either way; only
    /// dispatch stops. Dropping the engine performs the same shutdown with
    /// the configured [`shutdown_timeout`](EngineConfig::shutdown_timeout).
    pub fn shutdown(&self, timeout: Duration) -> bool {
        tracing::debug!(?timeout, pending = self.size(), "engine shutdown requested");
        self.dispatcher.shutdown_and_wait(timeout)
    }
}

impl Default for DeadlineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeadlineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineEngine")
            .field("size", &self.size())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
