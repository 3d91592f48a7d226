//! Error types for the deadline engine.
//!
//! Errors are explicit and typed. Only invalid input surfaces synchronously:
//! a deadline or poll time beyond the representable horizon, or a millisecond
//! whose sequence space is exhausted. Handler-side failures (panics, overruns)
//! are contained by the dispatcher and reported through logging and the
//! dispatch counters, never through these types.

use thiserror::Error;

use crate::key::DeadlineId;

/// Error returned by [`schedule`](crate::DeadlineEngine::schedule) and
/// [`poll`](crate::DeadlineEngine::poll) for invalid time input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The requested time does not fit in the key's time field.
    ///
    /// The packed representation would silently truncate; the engine rejects
    /// instead.
    #[error("time {deadline_ms}ms exceeds the representable horizon of {max_ms}ms")]
    HorizonExceeded {
        /// The rejected time in milliseconds since the Unix epoch.
        deadline_ms: u64,
        /// The largest accepted time, [`DeadlineId::MAX_TIME_MS`].
        max_ms: u64,
    },

    /// Every sequence slot for the requested millisecond is taken.
    ///
    /// With 2^20 slots per millisecond this is practically unreachable, but
    /// wrapping into the next millisecond would reorder deadlines, so the
    /// condition is surfaced loudly and the store is left untouched.
    #[error("all deadline slots at {time_ms}ms are taken")]
    SlotsExhausted {
        /// The saturated millisecond.
        time_ms: u64,
    },
}

impl ScheduleError {
    /// Builds the horizon error for a rejected time.
    pub(crate) const fn horizon(deadline_ms: u64) -> Self {
        Self::HorizonExceeded {
            deadline_ms,
            max_ms: DeadlineId::MAX_TIME_MS,
        }
    }
}

/// Error returned by [`ReadThroughCache::try_get`](crate::ReadThroughCache::try_get)
/// when the compute function fails.
///
/// Nothing is cached for the key on failure; a later call runs the compute
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cache compute failed: {0}")]
pub struct CacheComputeError<E>(pub E)
where
    E: std::error::Error;
