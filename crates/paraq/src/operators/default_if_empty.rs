use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use paraq_error::Result;

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::OrderKey;
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::sync::countdown::{BarrierArrival, CountdownEvent};

/// Yields a default value if the input is empty, otherwise passes the input
/// through.
///
/// Every partition except the first reports whether it saw any input, then
/// arrives at a barrier. The first partition waits for the others only when
/// its own input is empty, and yields the default if all of them were empty
/// too.
pub struct DefaultIfEmptyOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    default_value: T,
}

impl<T: Element> DefaultIfEmptyOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, default_value: T) -> Self {
        DefaultIfEmptyOperator {
            child,
            default_value,
        }
    }
}

impl<T: Element> QueryOperator<T> for DefaultIfEmptyOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone();
        UnaryQueryResults::open(&child, self, false, cx)
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        self.child
            .ordinal_index_state()
            .worse(OrdinalIndexState::Correct)
    }

    fn output_ordered(&self) -> bool {
        self.child.output_ordered()
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        true
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let mut input = self.child.as_sequential(cx)?.peekable();
        if input.peek().is_none() {
            return Ok(Box::new(std::iter::once(Ok(self.default_value.clone()))));
        }
        Ok(Box::new(input))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("DefaultIfEmpty").with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for DefaultIfEmptyOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let others = input.partition_count() - 1;
        let shared = Arc::new(EmptyPartitions {
            empty: AtomicUsize::new(0),
            others,
            latch: Arc::new(CountdownEvent::new(others)),
        });
        let state = self.ordinal_index_state();
        let default_key = input.comparer().initial_key();

        Ok(input.wrap_partitions(state, |partition, source| {
            let arrival = (partition != 0).then(|| BarrierArrival::new(shared.latch.clone()));
            Box::new(DefaultIfEmptyEnumerator {
                source,
                default_value: Some((self.default_value.clone(), default_key.clone())),
                shared: shared.clone(),
                arrival,
                poller: cx.cancellation().poller(),
                started: false,
            }) as BoxedEnumerator<T>
        }))
    }
}

#[derive(Debug)]
struct EmptyPartitions {
    /// Number of partitions other than the first with no input.
    empty: AtomicUsize,
    /// Number of partitions other than the first.
    others: usize,
    /// Set once every partition other than the first has checked its input.
    latch: Arc<CountdownEvent>,
}

struct DefaultIfEmptyEnumerator<T> {
    source: BoxedEnumerator<T>,
    default_value: Option<(T, OrderKey)>,
    shared: Arc<EmptyPartitions>,
    /// Only for partitions other than the first.
    arrival: Option<BarrierArrival>,
    poller: CancellationPoller,
    started: bool,
}

impl<T: Element> QueryOperatorEnumerator<T> for DefaultIfEmptyEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.started {
            return self.source.move_next();
        }
        self.started = true;

        let first = self.source.move_next()?;

        if let Some(arrival) = self.arrival.as_mut() {
            if first.is_none() {
                self.shared.empty.fetch_add(1, Ordering::AcqRel);
            }
            arrival.arrive();
            return Ok(first);
        }

        if first.is_some() {
            return Ok(first);
        }

        self.shared.latch.wait(self.poller.cancellation())?;
        if self.shared.empty.load(Ordering::Acquire) == self.shared.others {
            return Ok(self.default_value.take());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyComparer;
    use crate::operators::concat::ConcatOperator;
    use crate::parallel_query::ParallelQuery;
    use crate::query::source::IterableSourceOperator;
    use crate::testutil::{parallel, test_context, test_settings};

    #[test]
    fn default_for_empty_input() {
        for dop in [1, 2, 5] {
            let out = parallel(Vec::<i32>::new(), dop)
                .default_if_empty(42)
                .to_vec()
                .unwrap();
            assert_eq!(vec![42], out, "dop: {dop}");
        }
    }

    #[test]
    fn passthrough_for_nonempty_input() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 4)
            .as_ordered()
            .filter(|v| *v == 9)
            .default_if_empty(0)
            .to_vec()
            .unwrap();
        assert_eq!(vec![9], out);

        let out = parallel(vec![5, 3, 8, 1, 9, 2], 3)
            .as_ordered()
            .default_if_empty(0)
            .to_vec()
            .unwrap();
        assert_eq!(vec![5, 3, 8, 1, 9, 2], out);
    }

    #[test]
    fn filtered_to_empty() {
        let out = parallel((0..1000).collect::<Vec<i32>>(), 4)
            .filter(|v| *v < 0)
            .default_if_empty(-1)
            .to_vec()
            .unwrap();
        assert_eq!(vec![-1], out);
    }

    #[test]
    fn default_key_follows_concat_comparer() {
        let empty = || -> Arc<dyn QueryOperator<i32>> {
            Arc::new(IterableSourceOperator::new(Vec::<i32>::new()))
        };
        let concat: Arc<dyn QueryOperator<i32>> = Arc::new(ConcatOperator::new(empty(), empty()));
        let op = DefaultIfEmptyOperator::new(concat.clone(), 7);
        let cx = test_context(3, false);

        let input = concat.open(&cx).unwrap().give_partitioned_stream(&cx).unwrap();
        let wrapped = op.wrap_partitioned_stream(input, &cx).unwrap();
        let (partitions, comparer, _) = wrapped.into_parts();
        assert!(matches!(comparer, KeyComparer::Concat { .. }));

        let outputs = cx
            .scheduler()
            .unwrap()
            .run_partitions(partitions, cx.cancellation(), |_, mut source| {
                let mut out = Vec::new();
                while let Some(item) = source.move_next()? {
                    out.push(item);
                }
                Ok(out)
            })
            .unwrap();

        let items: Vec<_> = outputs.into_iter().flatten().collect();
        assert_eq!(vec![(7, comparer.initial_key())], items);
        assert!(matches!(items[0].1, OrderKey::Left(_)));
    }

    #[test]
    fn concat_of_empty_inputs_then_default() {
        let empty = || {
            ParallelQuery::from_iterable(Vec::<i32>::new()).with_settings(test_settings(4))
        };
        let out = empty()
            .as_ordered()
            .concat(&empty())
            .default_if_empty(3)
            .take(1)
            .to_vec()
            .unwrap();
        assert_eq!(vec![3], out);
    }
}
