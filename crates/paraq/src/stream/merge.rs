//! Draining partitions and merging their outputs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use paraq_error::Result;
use tracing::{debug, trace};

use super::partition::partition_indexed;
use super::{BoxedEnumerator, PartitionedStream};
use crate::Element;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::source::ListSource;
use crate::runtime::context::QueryContext;

/// Run every partition to completion on the scheduler, returning the output of
/// each partition in partition order.
pub fn drain_partitions<T: Element>(
    partitions: Vec<BoxedEnumerator<T>>,
    cx: &QueryContext,
) -> Result<Vec<Vec<(T, OrderKey)>>> {
    let scheduler = cx.scheduler()?;
    scheduler.run_partitions(partitions, cx.cancellation(), |partition, mut enumerator| {
        let mut poller = cx.cancellation().poller();
        let mut out = Vec::new();
        while let Some(item) = enumerator.move_next()? {
            poller.tick()?;
            out.push(item);
        }
        trace!(partition, count = out.len(), "drained partition");
        Ok(out)
    })
}

/// Execute a stream and produce its final output.
///
/// When order is preserved, partition outputs are merged by key: a k-way
/// merge if keys increase within each partition, otherwise a stable sort of
/// everything. Without order, partitions are concatenated.
pub fn execute_and_collect<T: Element>(
    stream: PartitionedStream<T>,
    cx: &QueryContext,
    preserve_order: bool,
) -> Result<Vec<T>> {
    let (partitions, comparer, state) = stream.into_parts();
    let outputs = drain_partitions(partitions, cx)?;
    Ok(merge_partition_outputs(outputs, &comparer, state, preserve_order))
}

pub fn merge_partition_outputs<T>(
    outputs: Vec<Vec<(T, OrderKey)>>,
    comparer: &KeyComparer,
    state: OrdinalIndexState,
    preserve_order: bool,
) -> Vec<T> {
    if !preserve_order {
        return outputs.into_iter().flatten().map(|(v, _)| v).collect();
    }

    if state.is_worse_than(OrdinalIndexState::Increasing) {
        let mut all: Vec<_> = outputs.into_iter().flatten().collect();
        all.sort_by(|a, b| comparer.compare(&a.1, &b.1));
        return all.into_iter().map(|(v, _)| v).collect();
    }

    merge_sorted_runs(outputs, |a, b| comparer.compare(&a.1, &b.1))
        .into_iter()
        .map(|(v, _)| v)
        .collect()
}

/// Fully execute a stream and re-partition the results by position.
///
/// Used when an operator needs stronger guarantees about its input's keys
/// than the input can provide. Results are merged in key order, and the new
/// stream's keys are the positions in that order.
pub fn premature_merge<T: Element>(
    stream: PartitionedStream<T>,
    cx: &QueryContext,
) -> Result<PartitionedStream<T>> {
    debug!(state = %stream.ordinal_index_state(), partitions = stream.partition_count(), "premature merge");
    let values = execute_and_collect(stream, cx, true)?;
    partition_indexed(Arc::new(ListSource::new(values)), cx)
}

/// Merge runs that are each sorted according to `compare`.
///
/// Ties are broken by run index, so the merge is stable with respect to run
/// order.
pub fn merge_sorted_runs<E, F>(runs: Vec<Vec<E>>, compare: F) -> Vec<E>
where
    F: Fn(&E, &E) -> Ordering,
{
    let total = runs.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = runs.into_iter().map(Vec::into_iter).collect();

    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (run, iter) in iters.iter_mut().enumerate() {
        if let Some(item) = iter.next() {
            heap.push(RunHead {
                item,
                run,
                compare: &compare,
            });
        }
    }

    let mut out = Vec::with_capacity(total);
    while let Some(head) = heap.pop() {
        let RunHead { item, run, .. } = head;
        out.push(item);
        if let Some(item) = iters[run].next() {
            heap.push(RunHead {
                item,
                run,
                compare: &compare,
            });
        }
    }

    out
}

/// Entry in the merge heap. Ordering is reversed so the max-heap pops the
/// smallest item.
struct RunHead<'a, E, F> {
    item: E,
    run: usize,
    compare: &'a F,
}

impl<E, F> PartialEq for RunHead<'_, E, F>
where
    F: Fn(&E, &E) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E, F> Eq for RunHead<'_, E, F> where F: Fn(&E, &E) -> Ordering {}

impl<E, F> PartialOrd for RunHead<'_, E, F>
where
    F: Fn(&E, &E) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E, F> Ord for RunHead<'_, E, F>
where
    F: Fn(&E, &E) -> Ordering,
{
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&other.item, &self.item).then_with(|| other.run.cmp(&self.run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferedEnumerator;
    use crate::testutil::test_context;

    fn keyed(values: &[(i32, usize)]) -> Vec<(i32, OrderKey)> {
        values
            .iter()
            .map(|&(v, k)| (v, OrderKey::Index(k)))
            .collect()
    }

    #[test]
    fn merge_runs_stable() {
        let runs = vec![vec![(1, 'a'), (3, 'a')], vec![(1, 'b'), (2, 'b')], vec![]];
        let merged = merge_sorted_runs(runs, |a, b| a.0.cmp(&b.0));
        assert_eq!(vec![(1, 'a'), (1, 'b'), (2, 'b'), (3, 'a')], merged);
    }

    #[test]
    fn ordered_merge_by_key() {
        let outputs = vec![keyed(&[(10, 0), (30, 2)]), keyed(&[(20, 1), (40, 3)])];
        let merged =
            merge_partition_outputs(outputs, &KeyComparer::Natural, OrdinalIndexState::Increasing, true);
        assert_eq!(vec![10, 20, 30, 40], merged);
    }

    #[test]
    fn shuffled_merge_sorts() {
        let outputs = vec![keyed(&[(40, 3), (10, 0)]), keyed(&[(30, 2), (20, 1)])];
        let merged =
            merge_partition_outputs(outputs, &KeyComparer::Natural, OrdinalIndexState::Shuffled, true);
        assert_eq!(vec![10, 20, 30, 40], merged);
    }

    #[test]
    fn unordered_concatenates() {
        let outputs = vec![keyed(&[(40, 3), (10, 0)]), keyed(&[(30, 2)])];
        let merged =
            merge_partition_outputs(outputs, &KeyComparer::Natural, OrdinalIndexState::Shuffled, false);
        assert_eq!(vec![40, 10, 30], merged);
    }

    #[test]
    fn premature_merge_reindexes() {
        let cx = test_context(2, false);
        let partitions: Vec<BoxedEnumerator<i32>> = vec![
            Box::new(BufferedEnumerator::new(keyed(&[(3, 7), (1, 9)]))),
            Box::new(BufferedEnumerator::new(keyed(&[(2, 8)]))),
        ];
        let stream =
            PartitionedStream::try_new(partitions, KeyComparer::Natural, OrdinalIndexState::Increasing)
                .unwrap();

        let merged = premature_merge(stream, &cx).unwrap();
        let values = execute_and_collect(merged, &cx, true).unwrap();
        assert_eq!(vec![3, 2, 1], values);
    }
}
