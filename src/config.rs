//! Engine configuration.
//!
//! The engine is constructed programmatically from an [`EngineConfig`]; there
//! is no file or environment layer.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `handler_timeout` | 10 seconds |
//! | `worker_threads` | available CPU parallelism |
//! | `shutdown_timeout` | 5 seconds |
//! | `thread_name_prefix` | `"knell"` |

use std::time::Duration;

/// Configuration for a [`DeadlineEngine`](crate::DeadlineEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest a fired handler may run before the watchdog disowns it.
    ///
    /// A disowned handler is reported and abandoned; its worker returns to
    /// the pool when the handler eventually returns.
    ///
    /// Default: 10 seconds
    pub handler_timeout: Duration,

    /// Number of dispatch worker threads.
    ///
    /// Default: available CPU parallelism
    pub worker_threads: usize,

    /// How long dropping the engine waits for in-flight handlers.
    ///
    /// Explicit [`shutdown`](crate::DeadlineEngine::shutdown) calls take
    /// their own timeout; this bound applies only to the implicit shutdown
    /// on drop.
    ///
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,

    /// Name prefix for dispatch threads.
    ///
    /// Default: `"knell"`
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(10),
            worker_threads: default_worker_threads(),
            shutdown_timeout: Duration::from_secs(5),
            thread_name_prefix: "knell".to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler timeout.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Sets the number of dispatch worker threads.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the shutdown timeout applied on drop.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the dispatch thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Normalize configuration values to safe defaults.
    pub(crate) fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = default_worker_threads();
        }
        if self.handler_timeout.is_zero() {
            self.handler_timeout = Duration::from_millis(1);
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "knell".to_string();
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .max(1)
}
