use crate::{
    config::Config,
    error::{panic_message, Error, Result, WorkerFailure},
};
use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{mpsc::channel, Arc},
};
use threadpool::{Builder, ThreadPool};

pub(crate) fn build_pool(config: &Config, name: &str) -> ThreadPool {
    Builder::new()
        .num_threads(config.workers.max(1))
        .thread_name(format!("fanout-{}", name))
        .build()
}

/// Sizes of at most `n_parts` contiguous partitions covering `len` elements. Each partition
/// gets an even share and the first `len % n_parts` of them get one more. Never returns an
/// empty partition unless `len` itself is zero.
pub(crate) fn partition_sizes(len: usize, n_parts: usize) -> Vec<usize> {
    let n_parts = n_parts.clamp(1, len.max(1));
    let n_each = len / n_parts;
    let mut n_rem = len % n_parts;
    let mut add_one_if_remaining = ||
        if n_rem > 0 {
            n_rem -= 1;
            1
        } else {
            0
        };

    (0..n_parts).map(|_| n_each + add_one_if_remaining()).collect()
}

/// Cuts `data` into contiguous partitions, runs `f` on every partition in `pool` and returns
/// the outputs in partition order. Inputs no longer than `threshold` are handled on the
/// calling thread as a single partition.
pub(crate) fn split_map<T, R, F>(
    pool: &ThreadPool,
    data: Vec<T>,
    n_parts: usize,
    threshold: usize,
    f: F,
) -> Result<Vec<R>>
where
    F: Fn(Vec<T>) -> R,
    F: Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    let n_tasks = data.len();
    if n_tasks <= threshold || n_parts <= 1 {
        return catch_unwind(AssertUnwindSafe(|| f(data)))
            .map(|r| vec![r])
            .map_err(|payload| {
                let failure = WorkerFailure {
                    index: 0,
                    reason: panic_message(payload),
                };
                Error::composite(1, vec![failure])
            });
    }

    let sizes = partition_sizes(n_tasks, n_parts);
    let n_jobs = sizes.len();
    let mut n_handled_tasks = 0;

    let f = Arc::new(f);
    let mut data = data;
    let (tx, rx) = channel();

    // Partitions are cut off the back so `split_off` never shifts the remaining elements.
    for n_cur_tasks in sizes.into_iter().rev() {
        n_handled_tasks += n_cur_tasks;
        let start = n_tasks - n_handled_tasks;
        let cur_data = data.split_off(start);

        let tx = tx.clone();
        let f = Arc::clone(&f);
        pool.execute(move || {
            let res = catch_unwind(AssertUnwindSafe(|| (*f)(cur_data))).map_err(panic_message);
            drop(f);
            // A closed receiver means the caller already gave up on this batch.
            let _ = tx.send((start, res));
        });
    }

    drop(tx);

    let res_map = rx.iter().collect::<BTreeMap<_, _>>();

    let mut res = Vec::with_capacity(n_jobs);
    let mut failures = Vec::new();

    for (start, r_data) in res_map {
        match r_data {
            Ok(r) => res.push(r),
            Err(reason) => failures.push(WorkerFailure { index: start as i64, reason }),
        }
    }

    if !failures.is_empty() {
        return Err(Error::composite(n_jobs, failures));
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ThreadPool {
        build_pool(&Config::default().with_workers(4), "test")
    }

    fn flat_map(data: Vec<i32>, n_parts: usize, threshold: usize) -> Vec<i32> {
        split_map(&pool(), data, n_parts, threshold, |part| {
            part.into_iter().map(|i| i * i).collect::<Vec<_>>()
        })
        .unwrap()
        .into_iter()
        .flatten()
        .collect()
    }

    #[test]
    fn sizes() {
        assert_eq!(partition_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(partition_sizes(2, 8), vec![1, 1]);
        assert_eq!(partition_sizes(0, 4), vec![0]);
        assert_eq!(partition_sizes(5, 0), vec![5]);
    }

    #[test]
    fn seq() {
        assert_eq!(flat_map(vec![1, 2, 3], 4, 4), vec![1, 4, 9]);
    }

    #[test]
    fn par1() {
        assert_eq!(flat_map(vec![1, 2, 3, 4, 5], 4, 4), vec![1, 4, 9, 16, 25]);
    }

    #[test]
    fn par2() {
        assert_eq!(
            flat_map(
                vec![
                    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19,
                ],
                16,
                0,
            ),
            vec![
                1, 4, 9, 16, 25, 36, 49, 64, 81, 100, 121, 144, 169, 196, 225, 256, 289, 324, 361,
            ],
        );
    }

    #[test]
    fn panicking_partition() {
        let err = split_map(&pool(), (0..100).collect::<Vec<i32>>(), 4, 0, |part| {
            if part.contains(&60) {
                panic!("bad partition");
            }
            part.len()
        })
        .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 50);
        assert_eq!(failures[0].reason, "bad partition");
    }
}
