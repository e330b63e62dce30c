//! Helpers shared by unit tests.

use crate::config::settings::{ExecutionMode, QuerySettings};
use crate::key::OrderKey;
use crate::parallel_query::ParallelQuery;
use crate::runtime::context::QueryContext;
use crate::stream::PartitionedStream;
use crate::Element;

pub fn test_settings(dop: usize) -> QuerySettings {
    logutil::init_test();
    QuerySettings::default()
        .with_degree_of_parallelism(Some(dop))
        .with_execution_mode(ExecutionMode::ForceParallelism)
}

pub fn test_context(dop: usize, prefer_striping: bool) -> QueryContext {
    let settings = test_settings(dop).with_striping(prefer_striping);
    QueryContext::try_new(&settings).unwrap()
}

/// Query over `values` forced to run in parallel with `dop` partitions.
pub fn parallel<T: Element>(values: Vec<T>, dop: usize) -> ParallelQuery<T> {
    ParallelQuery::from_vec(values).with_settings(test_settings(dop))
}

/// Drain each partition in turn on the current thread.
///
/// Only valid for streams whose partitions never wait on each other.
pub fn drain_stream<T>(stream: PartitionedStream<T>) -> Vec<Vec<(T, OrderKey)>> {
    let (partitions, _, _) = stream.into_parts();
    partitions
        .into_iter()
        .map(|mut partition| {
            let mut out = Vec::new();
            while let Some(item) = partition.move_next().unwrap() {
                out.push(item);
            }
            out
        })
        .collect()
}

pub fn sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
    values.sort();
    values
}
