//! Parallel iteration over a half-open integer range with cooperative early exit.
//!
//! Workers claim chunks of the range from a shared cursor and check the loop's control flags
//! before starting every single index:
//!
//! - [`LoopState::stop`] prevents any further index from starting. Items already running
//!   finish, then the call returns.
//! - [`LoopState::request_break`] prevents indices *above* the breaking one from starting,
//!   while every lower index still runs before the call returns.
//!
//! Since the cursor only moves forward, an index above the lowest break point can only be
//! claimed after every index below it, so a worker that sees such an index can retire.

use crate::{
    config::Config,
    error::{panic_message, Error, Result, WorkerFailure},
    split::build_pool,
};
use log::{debug, warn};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        mpsc::channel,
        Arc,
    },
    time::{Duration, Instant},
};
use threadpool::ThreadPool;

const NO_BREAK: i64 = i64::MAX;

struct LoopShared {
    stopped: AtomicBool,
    lowest_break: AtomicI64,
}

impl LoopShared {
    fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            lowest_break: AtomicI64::new(NO_BREAK),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn lowest_break(&self) -> Option<i64> {
        match self.lowest_break.load(Ordering::SeqCst) {
            NO_BREAK => None,
            index => Some(index),
        }
    }

    /// Whether `index` may still start.
    fn admits(&self, index: i64) -> bool {
        !self.is_stopped() && index <= self.lowest_break.load(Ordering::SeqCst)
    }
}

/// Control handle passed to every invocation of a loop body.
pub struct LoopState<'a> {
    index: i64,
    shared: &'a LoopShared,
}

impl LoopState<'_> {
    /// Index of the current iteration.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Ends the loop as soon as possible: no new iteration starts after this call.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    /// Ends the loop after all iterations below the current index have run.
    /// With several breaks, the lowest index wins.
    pub fn request_break(&self) {
        self.shared.lowest_break.fetch_min(self.index, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn lowest_break_iteration(&self) -> Option<i64> {
        self.shared.lowest_break()
    }

    /// True when the loop would not start this iteration any more, so long running bodies
    /// can bail out early.
    pub fn should_exit_current_iteration(&self) -> bool {
        !self.shared.admits(self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopResult {
    /// Every index of the range ran, with no stop or break requested.
    pub completed: bool,
    pub lowest_break_iteration: Option<i64>,
    /// Number of times the body was invoked.
    pub invoked: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct WorkerReport {
    invoked: usize,
    failures: Vec<WorkerFailure>,
}

pub struct ParallelRange {
    pool: ThreadPool,
    chunk: u64,
}

impl ParallelRange {
    pub fn new(config: &Config) -> Self {
        Self {
            pool: build_pool(config, "range"),
            chunk: config.range_chunk.max(1) as u64,
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.max_count()
    }

    /// Calls `body(i, state)` for every `i` in `[lo, hi)` and blocks until all started
    /// iterations have finished. `lo >= hi` is an empty range.
    ///
    /// A panicking body stops the loop; the panic is returned as a composite error once
    /// in-flight iterations have drained.
    pub fn for_each<F>(&self, lo: i64, hi: i64, body: F) -> Result<LoopResult>
    where
        F: Fn(i64, &LoopState<'_>) + Send + Sync + 'static,
    {
        let started = Instant::now();
        if lo >= hi {
            return Ok(LoopResult {
                completed: true,
                lowest_break_iteration: None,
                invoked: 0,
                elapsed: started.elapsed(),
            });
        }

        let len = hi.abs_diff(lo);
        let chunk = self.chunk;
        let n_chunks = len / chunk + u64::from(len % chunk != 0);
        let n_jobs = usize::try_from(n_chunks)
            .map_or(self.workers(), |n| n.min(self.workers()));

        let shared = Arc::new(LoopShared::new());
        let cursor = Arc::new(AtomicU64::new(0));
        let body = Arc::new(body);
        let (tx, rx) = channel();

        for _ in 0..n_jobs {
            let tx = tx.clone();
            let shared = Arc::clone(&shared);
            let cursor = Arc::clone(&cursor);
            let body = Arc::clone(&body);
            self.pool.execute(move || {
                let report = run_worker(lo, len, chunk, &cursor, &shared, &*body);
                // Callers may reclaim the body's captures as soon as the last report arrives.
                drop(body);
                let _ = tx.send(report);
            });
        }
        drop(tx);

        let mut invoked = 0;
        let mut failures = Vec::new();
        for mut report in rx.iter() {
            invoked += report.invoked;
            failures.append(&mut report.failures);
        }

        if !failures.is_empty() {
            return Err(Error::composite(invoked, failures));
        }

        let lowest_break_iteration = shared.lowest_break();
        let result = LoopResult {
            completed: !shared.is_stopped() && lowest_break_iteration.is_none(),
            lowest_break_iteration,
            invoked,
            elapsed: started.elapsed(),
        };
        debug!(
            "range [{}, {}) on {} workers: {} invocations, completed={}, in {:?}",
            lo, hi, n_jobs, result.invoked, result.completed, result.elapsed,
        );
        Ok(result)
    }

    /// Runs `body` once for every element of `items`; the state's index is the element's
    /// position.
    pub fn for_each_item<T, F>(&self, items: Vec<T>, body: F) -> Result<LoopResult>
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &LoopState<'_>) + Send + Sync + 'static,
    {
        let hi = i64::try_from(items.len()).unwrap_or(i64::MAX);
        let items = Arc::new(items);
        self.for_each(0, hi, move |i, state| body(&items[i as usize], state))
    }
}

fn run_worker<F>(
    lo: i64,
    len: u64,
    chunk: u64,
    cursor: &AtomicU64,
    shared: &LoopShared,
    body: &F,
) -> WorkerReport
where
    F: Fn(i64, &LoopState<'_>),
{
    let mut report = WorkerReport::default();

    'claim: while !shared.is_stopped() {
        let first = cursor.fetch_add(chunk, Ordering::SeqCst);
        if first >= len {
            break;
        }
        let last = first.saturating_add(chunk).min(len);

        for offset in first..last {
            // `lo + offset` always lies inside `[lo, hi)`, so the wrapping add is exact.
            let index = lo.wrapping_add(offset as i64);
            if !shared.admits(index) {
                break 'claim;
            }

            let state = LoopState { index, shared };
            report.invoked += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body(index, &state))) {
                let reason = panic_message(payload);
                warn!("loop body panicked at index {}: {}", index, reason);
                shared.stopped.store(true, Ordering::SeqCst);
                report.failures.push(WorkerFailure { index, reason });
            }
        }
    }

    report
}
