//! Knell: a millisecond-deadline engine with packed sortable keys.
//!
//! # Overview
//!
//! Knell tracks many independent future points in time ("deadlines") and
//! answers one recurring question cheaply: *which deadlines have already
//! passed?* Producers call [`schedule`](DeadlineEngine::schedule) with an
//! absolute time in milliseconds and get back an id; a polling loop calls
//! [`poll`](DeadlineEngine::poll) to drain a bounded batch of expired ids
//! into a worker pool; [`cancel`](DeadlineEngine::cancel) retracts a pending
//! id. This is the building block behind timeout managers, TTL expiry, retry
//! back-off, and event schedulers.
//!
//! The trick is the key: each deadline is stored as a single 64-bit value
//! whose high bits are the deadline time and whose low bits are a
//! per-millisecond sequence number ([`DeadlineId`]). Integer order equals
//! chronological order, so "everything due by now" is one range drain over
//! an ordered set, and the key itself is the caller's cancellation handle.
//!
//! # Contract
//!
//! - **Bounded polls**: `poll` removes at most `max_poll` entries; the rest
//!   stay pending for the next call
//! - **Nothing early**: entries with a time later than `now` are never
//!   removed by a poll
//! - **Contained handlers**: a handler that panics or overruns its timeout
//!   is reported and counted, never thrown back at the poll loop
//! - **Loud rejection**: times beyond the representable horizon and
//!   per-millisecond sequence overflow fail with typed errors, never
//!   silently truncate or wrap
//! - **No ordering promise**: concurrently due deadlines fire in an
//!   unspecified order, and a disowned handler may still complete later
//!
//! # Module Structure
//!
//! - [`engine`]: The [`DeadlineEngine`] facade
//! - [`key`]: Packed key layout ([`DeadlineId`])
//! - [`config`]: Engine construction options ([`EngineConfig`])
//! - [`error`]: Typed errors ([`ScheduleError`], [`CacheComputeError`])
//! - [`cache`]: Standalone read-through cache ([`ReadThroughCache`])
//! - [`test_utils`]: Logging and assertion helpers for tests
//!
//! # Example
//!
//! ```
//! use knell::{DeadlineEngine, EngineConfig};
//!
//! let engine = DeadlineEngine::with_config(EngineConfig::new().worker_threads(2));
//!
//! let id = engine.schedule(500)?;
//! assert_eq!(engine.size(), 1);
//!
//! // The polling loop drains everything due by `now`, at most 64 at a time.
//! let fired = engine.poll(1_000, |_id| { /* expiry work */ }, 64)?;
//! assert_eq!(fired, 1);
//! assert_eq!(engine.size(), 0);
//! # Ok::<(), knell::ScheduleError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod test_utils;

mod dispatch;
mod metrics;
mod store;

pub use cache::ReadThroughCache;
pub use config::EngineConfig;
pub use engine::DeadlineEngine;
pub use error::{CacheComputeError, ScheduleError};
pub use key::DeadlineId;
pub use metrics::MetricsSnapshot;
