//! Parallel query execution over in-memory sequences.
//!
//! Queries are built as a tree of operators through [`ParallelQuery`] and
//! executed with a fixed degree of parallelism. Each execution splits the
//! source into partitions, runs one partition per worker, then merges the
//! partition outputs back into a single result.
//!
//! ```ignore
//! let evens = ParallelQuery::range(0, 1000)
//!     .filter(|v| v % 2 == 0)
//!     .map(|v| v * 10)
//!     .to_vec()?;
//! ```

pub mod config;
pub mod exchange;
pub mod explain;
pub mod key;
pub mod operators;
pub mod ordinal;
pub mod parallel_query;
pub mod query;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::settings::{ExecutionMode, QuerySettings};
pub use operators::group_by::Grouping;
pub use ordinal::OrdinalIndexState;
pub use parallel_query::{OrderedParallelQuery, ParallelQuery};
pub use runtime::cancel::CancellationToken;

/// Bound required for any value flowing through a query.
///
/// Elements are cloned when a source hands out values by index and are moved
/// between worker threads.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Send + Sync + 'static {}
