//! Worker pool configuration shared by every parallel component.
//!
//! ```
//! let config = fanout::Config::default()
//!     .with_workers(4)
//!     .with_partitions(16);
//! assert_eq!(config.workers, 4);
//! ```

use crate::error::{Error, Result};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of pool threads (defaults to the number of logical CPUs).
    pub workers: usize,
    /// Indices a range worker claims at once. Control flags are still checked
    /// before every single index.
    pub range_chunk: usize,
    /// Partitions used by the grouping engine when none are given explicitly.
    pub partitions: usize,
    /// Inputs of at most this many elements are processed on the calling thread.
    pub parallelism_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            range_chunk: 16,
            partitions: workers,
            parallelism_threshold: 4,
        }
    }
}

impl Config {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_range_chunk(mut self, range_chunk: usize) -> Self {
        self.range_chunk = range_chunk;
        self
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_parallelism_threshold(mut self, threshold: usize) -> Self {
        self.parallelism_threshold = threshold;
        self
    }

    /// Defaults overridden by `FANOUT_WORKERS`, `FANOUT_RANGE_CHUNK`,
    /// `FANOUT_PARTITIONS` and `FANOUT_THRESHOLD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("FANOUT_WORKERS") {
            config.workers = parse_positive("FANOUT_WORKERS", &v)?;
            config.partitions = config.workers;
        }
        if let Some(v) = lookup("FANOUT_RANGE_CHUNK") {
            config.range_chunk = parse_positive("FANOUT_RANGE_CHUNK", &v)?;
        }
        if let Some(v) = lookup("FANOUT_PARTITIONS") {
            config.partitions = parse_positive("FANOUT_PARTITIONS", &v)?;
        }
        if let Some(v) = lookup("FANOUT_THRESHOLD") {
            config.parallelism_threshold = v
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("FANOUT_THRESHOLD={:?}: {}", v, e)))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be greater than zero".into()));
        }
        if self.range_chunk == 0 {
            return Err(Error::Config("range_chunk must be greater than zero".into()));
        }
        if self.partitions == 0 {
            return Err(Error::Config("partitions must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(Error::Config(format!("{} must be greater than zero", key))),
        Ok(n) => Ok(n),
        Err(e) => Err(Error::Config(format!("{}={:?}: {}", key, value, e))),
    }
}
