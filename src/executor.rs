//! Fan-out/join execution of independent work items.
//!
//! Every submitted item runs exactly once. A failing item (an `Err` return or a panic) never
//! stops its siblings: the executor waits for the whole batch and then reports all captured
//! failures together.

use crate::{
    config::Config,
    error::{panic_message, BoxError, Error, Result, WorkerFailure},
    split::build_pool,
};
use log::{debug, warn};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::mpsc::channel,
    time::{Duration, Instant},
};
use threadpool::ThreadPool;

/// A unit of work with no result. Returning `Err` marks the item as failed.
pub type WorkItem = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

/// Wraps a fallible closure into a [`WorkItem`].
pub fn work_item<F, E>(f: F) -> WorkItem
where
    F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move || f().map_err(Into::into))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    pub elapsed: Duration,
}

pub struct Executor {
    pool: ThreadPool,
}

impl Executor {
    pub fn new(config: &Config) -> Self {
        Self {
            pool: build_pool(config, "exec"),
        }
    }

    /// Number of pool threads. The pool grows to the size of the largest batch seen so far
    /// and never shrinks.
    pub fn workers(&self) -> usize {
        self.pool.max_count()
    }

    /// Runs every item on the pool and blocks until all of them have finished. The pool is
    /// grown first so that every item of the batch gets its own thread.
    pub fn run(&self, items: Vec<WorkItem>) -> Result<RunReport> {
        let started = Instant::now();
        let total = items.len();
        if total == 0 {
            return Ok(RunReport {
                completed: 0,
                elapsed: started.elapsed(),
            });
        }

        if self.pool.max_count() < total {
            debug!("growing pool from {} to {} threads", self.pool.max_count(), total);
            // Clones share the same workers, so resizing one resizes the pool.
            self.pool.clone().set_num_threads(total);
        }

        let (tx, rx) = channel();
        for (index, item) in items.into_iter().enumerate() {
            let tx = tx.clone();
            self.pool.execute(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(item)) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(payload) => Err(panic_message(payload)),
                };
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let mut failures = Vec::new();
        for (index, outcome) in rx.iter() {
            if let Err(reason) = outcome {
                warn!("work item {} failed: {}", index, reason);
                failures.push(WorkerFailure { index: index as i64, reason });
            }
        }

        if !failures.is_empty() {
            return Err(Error::composite(total, failures));
        }

        let elapsed = started.elapsed();
        debug!("{} work items finished in {:?}", total, elapsed);
        Ok(RunReport { completed: total, elapsed })
    }

    /// Infallible fan-out: runs every closure concurrently and waits for all of them.
    /// Panics are still captured and reported as failures.
    pub fn invoke<I, F>(&self, fns: I) -> Result<RunReport>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() + Send + 'static,
    {
        let items = fns
            .into_iter()
            .map(|f| -> WorkItem {
                Box::new(move || {
                    f();
                    Ok(())
                })
            })
            .collect();
        self.run(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        thread::sleep,
    };

    fn executor(workers: usize) -> Executor {
        Executor::new(&Config::default().with_workers(workers))
    }

    #[test]
    fn empty() {
        let report = executor(2).run(Vec::new()).unwrap();
        assert_eq!(report.completed, 0);
    }

    #[test]
    fn every_item_runs_once() {
        for &n in &[1usize, 3, 17, 200] {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let fns = (0..n).map(|i| {
                let seen = Arc::clone(&seen);
                move || seen.lock().unwrap().push(i)
            });

            let report = executor(4).invoke(fns).unwrap();
            assert_eq!(report.completed, n);

            let mut seen = seen.lock().unwrap().clone();
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn runs_concurrently() {
        let report = executor(2)
            .invoke((0..2).map(|_| || sleep(Duration::from_millis(400))))
            .unwrap();
        assert!(report.elapsed >= Duration::from_millis(400));
        assert!(report.elapsed < Duration::from_millis(800), "{:?}", report.elapsed);
    }

    #[test]
    fn batch_larger_than_cpus() {
        let exec = Executor::new(&Config::default());
        let n = num_cpus::get() + 2;
        let report = exec
            .invoke((0..n).map(|_| || sleep(Duration::from_millis(400))))
            .unwrap();
        assert_eq!(report.completed, n);
        assert!(report.elapsed < Duration::from_millis(800), "{:?}", report.elapsed);
        assert!(exec.workers() >= n);
    }

    #[test]
    fn pool_never_shrinks() {
        let exec = executor(2);
        assert_eq!(exec.workers(), 2);
        exec.invoke((0..5).map(|_| || ())).unwrap();
        assert_eq!(exec.workers(), 5);
        exec.invoke((0..3).map(|_| || ())).unwrap();
        assert_eq!(exec.workers(), 5);
    }

    #[test]
    fn failures_are_aggregated() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ran = Arc::new(AtomicUsize::new(0));
        let items = (0..6)
            .map(|i| {
                let ran = Arc::clone(&ran);
                work_item(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    match i {
                        1 => Err(format!("item {} refused", i)),
                        4 => panic!("item {} exploded", i),
                        _ => Ok(()),
                    }
                })
            })
            .collect();

        let err = executor(3).run(items).unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 6);

        match &err {
            Error::Composite { total, failures } => {
                assert_eq!(*total, 6);
                assert_eq!(
                    failures,
                    &vec![
                        WorkerFailure {
                            index: 1,
                            reason: "item 1 refused".into(),
                        },
                        WorkerFailure {
                            index: 4,
                            reason: "item 4 exploded".into(),
                        },
                    ],
                );
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn pool_survives_failures() {
        let exec = executor(2);
        assert!(exec.invoke(vec![|| panic!("first batch")]).is_err());
        assert_eq!(exec.invoke((0..2).map(|_| || ())).unwrap().completed, 2);
    }
}
