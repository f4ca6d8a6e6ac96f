//! Parallel building blocks on an explicit worker pool: fan-out/join execution, range
//! iteration with stop and break, a concurrent bag and partitioned grouping.

pub mod bag;
pub mod config;
pub mod error;
pub mod executor;
pub mod group;
pub mod range;
mod split;

pub use bag::ConcurrentBag;
pub use config::Config;
pub use error::{BoxError, Error, Result, WorkerFailure};
pub use executor::{work_item, Executor, RunReport, WorkItem};
pub use group::{Grouping, GroupingEngine, Record};
pub use range::{LoopResult, LoopState, ParallelRange};
