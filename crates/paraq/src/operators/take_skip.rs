use std::cmp::Ordering;
use std::sync::Arc;

use paraq_error::Result;
use parking_lot::Mutex;
use tracing::trace;

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{IndexedQueryResults, IndexedResults, QueryOperator, QueryResults, SequentialIter, try_indexed};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::merge::premature_merge;
use crate::stream::{BoxedEnumerator, EmptyEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::sync::countdown::{BarrierArrival, CountdownEvent};
use crate::sync::fixed_max_heap::FixedMaxHeap;

type KeyHeap = FixedMaxHeap<OrderKey, Box<dyn Fn(&OrderKey, &OrderKey) -> Ordering + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOrSkip {
    Take,
    Skip,
}

/// Takes or skips the `count` lowest keyed elements.
///
/// Every partition inserts its keys into a shared heap holding the `count`
/// lowest keys seen so far. A rejected insert means the partition's remaining
/// keys can't be among the lowest, so it stops searching. After all
/// partitions arrive at a barrier, the heap's max is the boundary key.
///
/// Random access input is handled as an index range view instead.
pub struct TakeSkipOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    count: usize,
    kind: TakeOrSkip,
    state: OrdinalIndexState,
    premature_merge: bool,
}

impl<T: Element> TakeSkipOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, count: usize, kind: TakeOrSkip) -> Self {
        let (input, premature_merge) = OrdinalIndexState::require(
            child.ordinal_index_state(),
            OrdinalIndexState::Increasing,
        );

        let state = match kind {
            TakeOrSkip::Take => input,
            // Skipped elements leave the remaining keys offset from their
            // positions, except for range views which are re-indexed.
            TakeOrSkip::Skip if input == OrdinalIndexState::Indexible => input,
            TakeOrSkip::Skip => input.worse(OrdinalIndexState::Increasing),
        };

        TakeSkipOperator {
            child,
            count,
            kind,
            state,
            premature_merge,
        }
    }

    fn wrap_stream(&self, input: PartitionedStream<T>, cx: &QueryContext) -> Result<PartitionedStream<T>> {
        if self.count == 0 {
            return match self.kind {
                TakeOrSkip::Take => Ok(input.wrap_partitions(self.state, |_, _source| {
                    Box::new(EmptyEnumerator) as BoxedEnumerator<T>
                })),
                TakeOrSkip::Skip => Ok(input.with_ordinal_index_state(self.state)),
            };
        }

        let comparer = input.comparer().clone();
        let heap_comparer = comparer.clone();
        let heap: KeyHeap = FixedMaxHeap::new(
            self.count,
            Box::new(move |a: &OrderKey, b: &OrderKey| heap_comparer.compare(a, b)),
        );
        let shared = Arc::new(Mutex::new(heap));
        let barrier = Arc::new(CountdownEvent::new(input.partition_count()));

        // Skip keeps pulling from its source after the barrier. If the source
        // itself waits on peers, stopping early could leave them waiting on
        // this partition, so buffer everything instead.
        let buffer_all = self.kind == TakeOrSkip::Skip && !self.premature_merge && self.child.uses_barriers();

        Ok(input.wrap_partitions(self.state, |partition, source| {
            Box::new(TakeSkipEnumerator {
                source: Some(source),
                kind: self.kind,
                partition,
                shared: shared.clone(),
                comparer: comparer.clone(),
                barrier: barrier.clone(),
                arrival: BarrierArrival::new(barrier.clone()),
                buffer_all,
                output: None,
                poller: cx.cancellation().poller(),
            }) as BoxedEnumerator<T>
        }))
    }
}

impl<T: Element> QueryOperator<T> for TakeSkipOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone().open(cx)?;

        let indexed = if self.premature_merge {
            None
        } else {
            try_indexed(&child)?
        };

        if let Some(indexed) = indexed {
            let len = indexed.len();
            let (offset, view_len) = match self.kind {
                TakeOrSkip::Take => (0, self.count.min(len)),
                TakeOrSkip::Skip => {
                    let offset = self.count.min(len);
                    (offset, len - offset)
                }
            };
            return Ok(Arc::new(IndexedQueryResults::new(Arc::new(IndexRangeView {
                inner: indexed,
                offset,
                len: view_len,
            }))));
        }

        Ok(Arc::new(TakeSkipQueryResults { child, op: self }))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        self.state
    }

    fn output_ordered(&self) -> bool {
        self.child.output_ordered()
    }

    fn limits_parallelism(&self) -> bool {
        self.premature_merge || self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        true
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let input = self.child.as_sequential(cx)?;
        Ok(match self.kind {
            TakeOrSkip::Take => Box::new(input.take(self.count)),
            TakeOrSkip::Skip => Box::new(input.skip(self.count)),
        })
    }

    fn explain_entry(&self) -> ExplainEntry {
        let name = match self.kind {
            TakeOrSkip::Take => "Take",
            TakeOrSkip::Skip => "Skip",
        };
        ExplainEntry::new(name)
            .with_value("count", self.count)
            .with_value("ordinal_state", self.state)
            .with_value("premature_merge", self.premature_merge)
            .with_child(self.child.explain_entry())
    }
}

struct TakeSkipQueryResults<T: Element> {
    child: Arc<dyn QueryResults<T>>,
    op: Arc<TakeSkipOperator<T>>,
}

impl<T: Element> QueryResults<T> for TakeSkipQueryResults<T> {
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<T>> {
        let mut input = self.child.clone().give_partitioned_stream(cx)?;
        if self.op.premature_merge {
            input = premature_merge(input, cx)?;
        }
        self.op.wrap_stream(input, cx)
    }
}

/// Contiguous window into random access results.
struct IndexRangeView<T> {
    inner: Arc<dyn IndexedResults<T>>,
    offset: usize,
    len: usize,
}

impl<T: Element> IndexedResults<T> for IndexRangeView<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> T {
        self.inner.get(self.offset + index)
    }
}

struct TakeSkipEnumerator<T> {
    /// Dropped before waiting for Take.
    source: Option<BoxedEnumerator<T>>,
    kind: TakeOrSkip,
    partition: usize,
    shared: Arc<Mutex<KeyHeap>>,
    comparer: KeyComparer,
    barrier: Arc<CountdownEvent>,
    arrival: BarrierArrival,
    buffer_all: bool,
    /// Filtered buffer, set once the boundary is known.
    output: Option<std::vec::IntoIter<(T, OrderKey)>>,
    poller: CancellationPoller,
}

impl<T: Element> TakeSkipEnumerator<T> {
    /// Buffer elements until this partition's keys can no longer be among
    /// the lowest.
    fn search(&mut self) -> Result<Vec<(T, OrderKey)>> {
        let mut buffer = Vec::new();
        let Some(source) = self.source.as_mut() else {
            return Ok(buffer);
        };

        let mut searching = true;
        while let Some((element, key)) = source.move_next()? {
            self.poller.tick()?;
            if searching && !self.shared.lock().insert(key.clone()) {
                searching = false;
                if self.kind == TakeOrSkip::Take {
                    break;
                }
                // Past the boundary, kept for Skip to yield.
                buffer.push((element, key));
                if !self.buffer_all {
                    break;
                }
                continue;
            }
            buffer.push((element, key));
        }

        Ok(buffer)
    }

    fn boundary(&self) -> Option<OrderKey> {
        let heap = self.shared.lock();
        if heap.is_full() {
            heap.max().cloned()
        } else {
            None
        }
    }
}

impl<T: Element> QueryOperatorEnumerator<T> for TakeSkipEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.output.is_none() {
            let buffer = self.search()?;
            if self.kind == TakeOrSkip::Take {
                self.source = None;
            }
            self.arrival.arrive();
            self.barrier.wait(self.poller.cancellation())?;

            let boundary = self.boundary();
            trace!(partition = self.partition, buffered = buffer.len(), ?boundary, "take/skip boundary found");

            let comparer = &self.comparer;
            let output: Vec<_> = match (self.kind, boundary) {
                (TakeOrSkip::Take, None) => buffer,
                (TakeOrSkip::Take, Some(boundary)) => buffer
                    .into_iter()
                    .filter(|(_, key)| comparer.compare(key, &boundary) != Ordering::Greater)
                    .collect(),
                (TakeOrSkip::Skip, None) => Vec::new(),
                (TakeOrSkip::Skip, Some(boundary)) => buffer
                    .into_iter()
                    .filter(|(_, key)| comparer.compare(key, &boundary) == Ordering::Greater)
                    .collect(),
            };
            self.output = Some(output.into_iter());
        }

        if let Some(item) = self.output.as_mut().and_then(Iterator::next) {
            return Ok(Some(item));
        }

        // Remaining source elements all come after the boundary.
        match self.source.as_mut() {
            Some(source) => {
                let next = source.move_next()?;
                if next.is_some() {
                    self.poller.tick()?;
                } else {
                    self.source = None;
                }
                Ok(next)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn take_scenario() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2).as_ordered();
        assert_eq!(vec![5, 3, 8], q.take(3).to_vec().unwrap());
        assert_eq!(vec![1, 9, 2], q.skip(3).to_vec().unwrap());
    }

    #[test]
    fn zero_and_oversized_counts() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 3).as_ordered();
        assert!(q.take(0).to_vec().unwrap().is_empty());
        assert_eq!(vec![5, 3, 8, 1, 9, 2], q.skip(0).to_vec().unwrap());
        assert_eq!(vec![5, 3, 8, 1, 9, 2], q.take(100).to_vec().unwrap());
        assert!(q.skip(100).to_vec().unwrap().is_empty());
    }

    #[test]
    fn take_skip_streaming_complement() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let values: Vec<i32> = (0..3000).map(|_| rng.random_range(0..1000)).collect();
        let expected: Vec<_> = values.iter().copied().filter(|v| v % 2 == 0).collect();

        for dop in [1, 2, 5, 8] {
            // Filtering first forces the heap based path.
            let q = parallel(values.clone(), dop)
                .as_ordered()
                .filter(|v| v % 2 == 0);
            for k in [0, 1, 17, 500, expected.len(), expected.len() + 3] {
                let mut got = q.take(k).to_vec().unwrap();
                assert_eq!(&expected[..k.min(expected.len())], &got[..], "dop: {dop}, k: {k}");
                got.extend(q.skip(k).to_vec().unwrap());
                assert_eq!(expected, got, "dop: {dop}, k: {k}");
            }
        }
    }

    #[test]
    fn take_over_list_is_range_view() {
        let q = parallel((0..100).collect::<Vec<i32>>(), 4).take(10);
        assert_eq!(OrdinalIndexState::Indexible, q.ordinal_index_state());
        assert_eq!((0..10).collect::<Vec<_>>(), sorted(q.to_vec().unwrap()));
    }

    #[test]
    fn skip_after_take_barrier() {
        // Skip over an input that itself waits at a barrier.
        let q = parallel((0..1000).collect::<Vec<i32>>(), 4)
            .as_ordered()
            .filter(|v| v % 3 != 0)
            .take(400)
            .skip(100);
        let expected: Vec<_> = (0..1000).filter(|v| v % 3 != 0).take(400).skip(100).collect();
        assert_eq!(expected, q.to_vec().unwrap());
    }

    #[test]
    fn take_unordered_returns_some_k_elements() {
        let values: Vec<i32> = (0..500).collect();
        let got = parallel(values, 4).filter(|v| v % 2 == 1).take(50).to_vec().unwrap();
        assert_eq!(50, got.len());
        assert!(got.iter().all(|v| v % 2 == 1));
    }
}
