//! An unordered collection that any number of threads can insert into at once.
//!
//! Values live in a fixed set of mutex-guarded shards. Each thread is pinned to one shard on
//! first use, so concurrent inserters from different threads rarely meet on the same lock.
//!
//! ```
//! use fanout::{Config, ConcurrentBag, ParallelRange};
//! use std::sync::Arc;
//!
//! let bag = Arc::new(ConcurrentBag::new());
//! let sink = Arc::clone(&bag);
//! ParallelRange::new(&Config::default())
//!     .for_each(0, 10_000, move |i, _| sink.insert(i))
//!     .unwrap();
//! assert_eq!(bag.len(), 10_000);
//! ```
//!
//! A plain `Vec` cannot stand in for it: pushing to one from several threads is rejected at
//! compile time rather than losing updates at run time.
//!
//! ```compile_fail
//! let mut list = Vec::new();
//! std::thread::scope(|s| {
//!     for i in 0..4 {
//!         s.spawn(|| list.push(i));
//!     }
//! });
//! ```

use std::{
    cell::Cell,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD_HINT: Cell<Option<usize>> = Cell::new(None);
}

fn shard_hint() -> usize {
    SHARD_HINT.with(|hint| match hint.get() {
        Some(slot) => slot,
        None => {
            let slot = NEXT_SHARD.fetch_add(1, Ordering::Relaxed);
            hint.set(Some(slot));
            slot
        }
    })
}

// A panic while holding a shard lock cannot leave a `Vec` half-pushed.
fn lock<T>(shard: &Mutex<Vec<T>>) -> MutexGuard<'_, Vec<T>> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConcurrentBag<T> {
    shards: Box<[Mutex<Vec<T>>]>,
    len: AtomicUsize,
}

impl<T> ConcurrentBag<T> {
    /// A bag with one shard per logical CPU.
    pub fn new() -> Self {
        Self::with_shards(num_cpus::get())
    }

    pub fn with_shards(n_shards: usize) -> Self {
        Self {
            shards: (0..n_shards.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
            len: AtomicUsize::new(0),
        }
    }

    fn home(&self) -> usize {
        shard_hint() % self.shards.len()
    }

    pub fn insert(&self, value: T) {
        let mut shard = lock(&self.shards[self.home()]);
        shard.push(value);
        // Counted under the shard lock so a concurrent `try_take` never sees the value
        // before it is counted.
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of completed insertions minus removals.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes an arbitrary element, preferring the calling thread's own shard.
    pub fn try_take(&self) -> Option<T> {
        let home = self.home();
        let n_shards = self.shards.len();
        (0..n_shards).find_map(|i| {
            let mut shard = lock(&self.shards[(home + i) % n_shards]);
            let value = shard.pop()?;
            self.len.fetch_sub(1, Ordering::AcqRel);
            Some(value)
        })
    }

    /// Copy of the current contents in no particular order. Shards are visited one at a
    /// time, so inserts racing with the snapshot may or may not be included.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            out.extend(lock(shard).iter().cloned());
        }
        out
    }

    pub fn into_vec(self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len.into_inner());
        for shard in self.shards.into_vec() {
            out.append(&mut shard.into_inner().unwrap_or_else(PoisonError::into_inner));
        }
        out
    }
}

impl<T> Default for ConcurrentBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for ConcurrentBag<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let bag = Self::new();
        for value in iter {
            bag.insert(value);
        }
        bag
    }
}

impl<T> fmt::Debug for ConcurrentBag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentBag")
            .field("len", &self.len())
            .field("shards", &self.shards.len())
            .finish()
    }
}
