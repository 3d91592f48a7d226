//! Handler dispatch with timeout disown.
//!
//! Fired deadlines are executed on a fixed pool of worker threads. A separate
//! watchdog thread tracks one disown deadline per dispatched job; a job that
//! has not settled when its disown deadline passes is marked disowned,
//! counted, and logged, and the poll loop never hears about it.
//!
//! Disowning is cooperative. A job that is still queued when disowned is
//! skipped by the worker that pops it. A handler that is already running
//! cannot be preempted; it keeps its worker until it returns, but the
//! overrun has already been reported and dispatch has moved on.
//!
//! Each job settles exactly once, decided by compare-and-swap: the worker
//! settles it `Done`, the watchdog settles it `Disowned`, and whichever
//! loses the race leaves the counters alone.

use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::config::EngineConfig;
use crate::key::DeadlineId;
use crate::metrics::DispatchMetrics;

/// Handler invoked with the id of each fired deadline.
pub(crate) type Handler = Arc<dyn Fn(DeadlineId) + Send + Sync>;

const PHASE_PENDING: u8 = 0;
const PHASE_DONE: u8 = 1;
const PHASE_DISOWNED: u8 = 2;

/// Settlement state shared between a job, its worker, and the watchdog.
#[derive(Debug)]
struct JobState {
    phase: AtomicU8,
}

impl JobState {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(PHASE_PENDING),
        }
    }

    /// Worker-side settle. False if the watchdog disowned the job first.
    fn try_finish(&self) -> bool {
        self.phase
            .compare_exchange(PHASE_PENDING, PHASE_DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Watchdog-side settle. False if the job already finished.
    fn try_disown(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_PENDING,
                PHASE_DISOWNED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn is_disowned(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_DISOWNED
    }

    fn is_settled(&self) -> bool {
        self.phase.load(Ordering::Acquire) != PHASE_PENDING
    }
}

/// A fired deadline waiting for a worker.
struct Job {
    id: DeadlineId,
    run: Handler,
    state: Arc<JobState>,
}

/// Watchdog heap entry: when to give up on a job.
struct Watch {
    fire_at: Instant,
    id: DeadlineId,
    state: Arc<JobState>,
}

impl PartialEq for Watch {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}

impl Eq for Watch {}

impl PartialOrd for Watch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Watch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse for min-heap (earliest disown deadline first)
        other.fire_at.cmp(&self.fire_at)
    }
}

/// The worker pool plus its watchdog.
pub(crate) struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Jobs waiting for a worker.
    queue: SegQueue<Job>,
    /// Jobs pushed but not yet popped.
    pending_count: AtomicUsize,
    /// Workers currently inside a handler.
    busy_workers: AtomicUsize,
    /// Live threads (workers plus watchdog); each decrements on exit.
    active_threads: AtomicUsize,
    /// Intake stops and threads drain once set.
    shutdown: AtomicBool,
    /// Worker parking.
    park_mutex: Mutex<()>,
    park_condvar: Condvar,
    /// Watchdog heap and its wakeup.
    watches: Mutex<BinaryHeap<Watch>>,
    watchdog_condvar: Condvar,
    /// How long a handler may run before being disowned.
    handler_timeout: Duration,
    /// How long `Drop` waits for in-flight handlers.
    shutdown_timeout: Duration,
    metrics: Arc<DispatchMetrics>,
    thread_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts the worker pool and watchdog described by `config`.
    pub(crate) fn new(config: &EngineConfig, metrics: Arc<DispatchMetrics>) -> Self {
        let inner = Arc::new(DispatcherInner {
            queue: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            busy_workers: AtomicUsize::new(0),
            active_threads: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            park_mutex: Mutex::new(()),
            park_condvar: Condvar::new(),
            watches: Mutex::new(BinaryHeap::new()),
            watchdog_condvar: Condvar::new(),
            handler_timeout: config.handler_timeout,
            shutdown_timeout: config.shutdown_timeout,
            metrics,
            thread_handles: Mutex::new(Vec::with_capacity(config.worker_threads + 1)),
        });

        for index in 0..config.worker_threads {
            spawn_worker(&inner, &config.thread_name_prefix, index);
        }
        spawn_watchdog(&inner, &config.thread_name_prefix);

        Self { inner }
    }

    /// Hands a fired deadline to the pool and arms its disown deadline.
    ///
    /// After [`shutdown`](Self::shutdown) nothing is queued: the job is
    /// counted dispatched and disowned at the door, since no worker or
    /// watchdog may remain to pick it up.
    pub(crate) fn dispatch(&self, id: DeadlineId, run: Handler) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.metrics.record_dispatched();
            self.inner.metrics.record_disowned();
            tracing::warn!(id = %id, "dispatch after shutdown, disowning");
            return;
        }

        let state = Arc::new(JobState::new());
        let fire_at = deadline_after(Instant::now(), self.inner.handler_timeout);

        // Counted before the push; the pop side decrements as soon as the
        // job is visible.
        self.inner.pending_count.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push(Job {
            id,
            run,
            state: Arc::clone(&state),
        });
        self.inner.metrics.record_dispatched();

        {
            let mut watches = self.inner.watches.lock();
            watches.push(Watch { fire_at, id, state });
            self.inner.watchdog_condvar.notify_one();
        }
        {
            let _guard = self.inner.park_mutex.lock();
            self.inner.park_condvar.notify_one();
        }
    }

    /// Jobs pushed but not yet picked up by a worker.
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Workers currently inside a handler.
    pub(crate) fn busy_workers(&self) -> usize {
        self.inner.busy_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops intake and wakes every thread.
    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.notify_all();
    }

    /// Shuts down and waits up to `timeout` for the threads to drain the
    /// queue and exit, joining them on success.
    ///
    /// Returns `false` if the timeout elapsed first; remaining threads are
    /// left to finish their current handler unsupervised.
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let deadline = deadline_after(Instant::now(), timeout);
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(
                    busy = self.busy_workers(),
                    pending = self.pending_count(),
                    "dispatcher shutdown timed out"
                );
                return false;
            }
            self.notify_all();
            thread::sleep(Duration::from_millis(10).min(remaining));
        }

        let mut handles = self.inner.thread_handles.lock();
        for handle in handles.drain(..) {
            // Threads have already exited, so join returns immediately.
            let _ = handle.join();
        }
        tracing::debug!("dispatcher shut down cleanly");
        true
    }

    fn notify_all(&self) {
        {
            let _guard = self.inner.park_mutex.lock();
            self.inner.park_condvar.notify_all();
        }
        {
            let _watches = self.inner.watches.lock();
            self.inner.watchdog_condvar.notify_all();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending_count())
            .field("busy", &self.busy_workers())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// `now` advanced by `timeout`, pinned to a far-future instant when the sum
/// is not representable.
fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86_400);
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn spawn_worker(inner: &Arc<DispatcherInner>, prefix: &str, index: usize) {
    let inner_clone = Arc::clone(inner);
    let name = format!("{prefix}-worker-{index}");
    inner.active_threads.fetch_add(1, Ordering::Relaxed);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            worker_loop(&inner_clone);
            inner_clone.active_threads.fetch_sub(1, Ordering::Relaxed);
        })
        .expect("failed to spawn dispatch worker");

    inner.thread_handles.lock().push(handle);
}

fn spawn_watchdog(inner: &Arc<DispatcherInner>, prefix: &str) {
    let inner_clone = Arc::clone(inner);
    let name = format!("{prefix}-watchdog");
    inner.active_threads.fetch_add(1, Ordering::Relaxed);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            watchdog_loop(&inner_clone);
            inner_clone.active_threads.fetch_sub(1, Ordering::Relaxed);
        })
        .expect("failed to spawn dispatch watchdog");

    inner.thread_handles.lock().push(handle);
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            run_job(inner, job);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.park_mutex.lock();
        // Re-check under the lock; a dispatch may have raced the empty pop.
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            inner.park_condvar.wait(&mut guard);
        }
    }
}

fn run_job(inner: &DispatcherInner, job: Job) {
    // Disowned while still queued; the watchdog already reported it.
    if job.state.is_disowned() {
        return;
    }

    inner.busy_workers.fetch_add(1, Ordering::Relaxed);
    let outcome = catch_unwind(AssertUnwindSafe(|| (job.run)(job.id)));
    inner.busy_workers.fetch_sub(1, Ordering::Relaxed);

    let finished_first = job.state.try_finish();
    match outcome {
        Ok(()) => {
            if finished_first {
                inner.metrics.record_completed();
            }
        }
        Err(_) => {
            // A job the watchdog already disowned keeps that terminal
            // count; the panic is reported in the log only.
            if finished_first {
                inner.metrics.record_panicked();
            }
            tracing::error!(id = %job.id, "deadline handler panicked");
        }
    }
}

fn watchdog_loop(inner: &DispatcherInner) {
    let mut watches = inner.watches.lock();
    loop {
        // Drop entries whose job already settled.
        while watches.peek().map_or(false, |w| w.state.is_settled()) {
            watches.pop();
        }

        if inner.shutdown.load(Ordering::Acquire) {
            if watches.is_empty() {
                break;
            }
            // Only this thread left: the remaining jobs have no worker to
            // run them and will never settle on their own.
            if inner.active_threads.load(Ordering::Acquire) == 1 {
                while let Some(watch) = watches.pop() {
                    if watch.state.try_disown() {
                        inner.metrics.record_disowned();
                        tracing::warn!(id = %watch.id, "job abandoned at shutdown, disowning");
                    }
                }
                break;
            }
        }

        let now = Instant::now();
        match watches.peek().map(|w| w.fire_at) {
            Some(fire_at) if fire_at <= now => {
                if let Some(watch) = watches.pop() {
                    if watch.state.try_disown() {
                        inner.metrics.record_disowned();
                        tracing::warn!(
                            id = %watch.id,
                            timeout = ?inner.handler_timeout,
                            "deadline handler exceeded its timeout, disowning"
                        );
                    }
                }
            }
            Some(fire_at) => {
                let _ = inner.watchdog_condvar.wait_for(&mut watches, fire_at - now);
            }
            None => inner.watchdog_condvar.wait(&mut watches),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
        // Give threads a chance to exit gracefully.
        let _ = self.shutdown_and_wait(self.inner.shutdown_timeout);
    }
}
