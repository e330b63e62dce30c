use std::cmp::Ordering as KeyOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use paraq_error::Result;
use parking_lot::Mutex;
use tracing::trace;

use super::ElementPredicate;
use super::take_skip::TakeOrSkip;
use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::sync::countdown::{BarrierArrival, CountdownEvent};

/// Takes or skips elements while a predicate holds.
///
/// The boundary is the lowest key of any element failing the predicate.
/// Partitions race to find it, publishing lower keys to a shared record.
/// A partition stops searching once its keys pass the lowest published key.
pub struct TakeSkipWhileOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    predicate: ElementPredicate<T>,
    kind: TakeOrSkip,
    state: OrdinalIndexState,
    premature_merge: bool,
}

impl<T: Element> TakeSkipWhileOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, predicate: ElementPredicate<T>, kind: TakeOrSkip) -> Self {
        let required = if predicate.is_indexed() {
            OrdinalIndexState::Correct
        } else {
            OrdinalIndexState::Increasing
        };
        let (input, premature_merge) = OrdinalIndexState::require(child.ordinal_index_state(), required);

        let state = match kind {
            TakeOrSkip::Take => input.worse(OrdinalIndexState::Correct),
            TakeOrSkip::Skip => input.worse(OrdinalIndexState::Increasing),
        };

        TakeSkipWhileOperator {
            child,
            predicate,
            kind,
            state,
            premature_merge,
        }
    }
}

impl<T: Element> QueryOperator<T> for TakeSkipWhileOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone();
        let premature_merge = self.premature_merge;
        UnaryQueryResults::open(&child, self, premature_merge, cx)
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
        let input = self.child.as_sequential(cx)?.enumerate();
        let predicate = self.predicate.clone();

        Ok(match self.kind {
            TakeOrSkip::Take => Box::new(
                input
                    .take_while(move |(idx, item)| match item {
                        Ok(element) => predicate.evaluate(element, *idx),
                        Err(_) => true,
                    })
                    .map(|(_, item)| item),
            ),
            TakeOrSkip::Skip => Box::new(
                input
                    .skip_while(move |(idx, item)| match item {
                        Ok(element) => predicate.evaluate(element, *idx),
                        Err(_) => false,
                    })
                    .map(|(_, item)| item),
            ),
        })
    }

    fn explain_entry(&self) -> ExplainEntry {
        let name = match self.kind {
            TakeOrSkip::Take => "TakeWhile",
            TakeOrSkip::Skip => "SkipWhile",
        };
        ExplainEntry::new(name)
            .with_value("indexed", self.predicate.is_indexed())
            .with_value("ordinal_state", self.state)
            .with_value("premature_merge", self.premature_merge)
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for TakeSkipWhileOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let shared = Arc::new(LowestFailingKey {
            key: Mutex::new(None),
            updates: AtomicUsize::new(0),
            comparer: input.comparer().clone(),
        });
        let barrier = Arc::new(CountdownEvent::new(input.partition_count()));
        let buffer_all =
            self.kind == TakeOrSkip::Skip && !self.premature_merge && self.child.uses_barriers();

        Ok(input.wrap_partitions(self.state, |partition, source| {
            Box::new(TakeSkipWhileEnumerator {
                source: Some(source),
                predicate: self.predicate.clone(),
                kind: self.kind,
                partition,
                shared: shared.clone(),
                seen_updates: 0,
                cached_lowest: None,
                barrier: barrier.clone(),
                arrival: BarrierArrival::new(barrier.clone()),
                buffer_all,
                output: None,
                poller: cx.cancellation().poller(),
            }) as BoxedEnumerator<T>
        }))
    }
}

/// Lowest key of an element failing the predicate across all partitions.
#[derive(Debug)]
struct LowestFailingKey {
    key: Mutex<Option<OrderKey>>,
    /// Incremented on every change, letting partitions skip the lock when
    /// nothing changed since they last looked.
    updates: AtomicUsize,
    comparer: KeyComparer,
}

impl LowestFailingKey {
    fn offer(&self, key: &OrderKey) {
        let mut lowest = self.key.lock();
        let replace = match lowest.as_ref() {
            None => true,
            Some(current) => self.comparer.compare(key, current) == KeyOrdering::Less,
        };
        if replace {
            *lowest = Some(key.clone());
            self.updates.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn current(&self) -> Option<OrderKey> {
        self.key.lock().clone()
    }
}

struct TakeSkipWhileEnumerator<T> {
    /// Dropped before waiting for TakeWhile.
    source: Option<BoxedEnumerator<T>>,
    predicate: ElementPredicate<T>,
    kind: TakeOrSkip,
    partition: usize,
    shared: Arc<LowestFailingKey>,
    seen_updates: usize,
    cached_lowest: Option<OrderKey>,
    barrier: Arc<CountdownEvent>,
    arrival: BarrierArrival,
    buffer_all: bool,
    output: Option<std::vec::IntoIter<(T, OrderKey)>>,
    poller: CancellationPoller,
}

impl<T: Element> TakeSkipWhileEnumerator<T> {
    /// If another partition already failed the predicate before `key`.
    fn passed_boundary(&mut self, key: &OrderKey) -> bool {
        let updates = self.shared.updates.load(Ordering::Acquire);
        if updates != self.seen_updates {
            self.seen_updates = updates;
            self.cached_lowest = self.shared.current();
        }
        self.cached_lowest
            .as_ref()
            .is_some_and(|lowest| self.shared.comparer.compare(lowest, key) == KeyOrdering::Less)
    }

    fn search(&mut self) -> Result<Vec<(T, OrderKey)>> {
        let mut buffer = Vec::new();
        let Some(mut source) = self.source.take() else {
            return Ok(buffer);
        };

        let mut searching = true;
        while let Some((element, key)) = source.move_next()? {
            self.poller.tick()?;

            if searching {
                let stop = self.passed_boundary(&key) || {
                    let passes = self.predicate.evaluate_keyed(&element, &key)?;
                    if !passes {
                        self.shared.offer(&key);
                    }
                    !passes
                };

                if stop {
                    searching = false;
                    if self.kind == TakeOrSkip::Take {
                        break;
                    }
                    buffer.push((element, key));
                    if !self.buffer_all {
                        break;
                    }
                    continue;
                }
            }
            buffer.push((element, key));
        }

        if self.kind == TakeOrSkip::Skip {
            self.source = Some(source);
        }
        Ok(buffer)
    }
}

impl<T: Element> QueryOperatorEnumerator<T> for TakeSkipWhileEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.output.is_none() {
            let buffer = self.search()?;
            self.arrival.arrive();
            self.barrier.wait(self.poller.cancellation())?;

            let boundary = self.shared.current();
            trace!(partition = self.partition, buffered = buffer.len(), ?boundary, "while boundary found");

            let comparer = &self.shared.comparer;
            let output: Vec<_> = match (self.kind, boundary) {
                (TakeOrSkip::Take, None) => buffer,
                (TakeOrSkip::Take, Some(boundary)) => buffer
                    .into_iter()
                    .filter(|(_, key)| comparer.compare(key, &boundary) == KeyOrdering::Less)
                    .collect(),
                (TakeOrSkip::Skip, None) => Vec::new(),
                (TakeOrSkip::Skip, Some(boundary)) => buffer
                    .into_iter()
                    .filter(|(_, key)| comparer.compare(key, &boundary) != KeyOrdering::Less)
                    .collect(),
            };
            self.output = Some(output.into_iter());
        }

        if let Some(item) = self.output.as_mut().and_then(Iterator::next) {
            return Ok(Some(item));
        }

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
    use crate::testutil::parallel;

    #[test]
    fn take_while_and_skip_while() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2).as_ordered();
        assert_eq!(vec![5, 3, 8], q.take_while(|v| *v > 2).to_vec().unwrap());
        assert_eq!(vec![1, 9, 2], q.skip_while(|v| *v > 2).to_vec().unwrap());
    }

    #[test]
    fn predicate_never_fails() {
        let q = parallel(vec![1, 2, 3, 4], 3).as_ordered();
        assert_eq!(vec![1, 2, 3, 4], q.take_while(|_| true).to_vec().unwrap());
        assert!(q.skip_while(|_| true).to_vec().unwrap().is_empty());
    }

    #[test]
    fn indexed_variants() {
        let q = parallel(vec![10, 20, 30, 5, 50], 2).as_ordered();
        assert_eq!(
            vec![10, 20],
            q.take_while_indexed(|v, idx| *v > 5 && idx < 2).to_vec().unwrap()
        );
        assert_eq!(
            vec![30, 5, 50],
            q.skip_while_indexed(|_, idx| idx < 2).to_vec().unwrap()
        );
    }

    #[test]
    fn random_matches_sequential() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for dop in [1, 2, 4, 7] {
            let values: Vec<u32> = (0..2000).map(|_| rng.random_range(0..10_000)).collect();
            let limit = rng.random_range(9_900..10_000);

            let expected_take: Vec<_> = values.iter().copied().take_while(|v| *v < limit).collect();
            let expected_skip: Vec<_> = values.iter().copied().skip_while(|v| *v < limit).collect();

            let q = parallel(values, dop).as_ordered().filter(|v| v % 7 != 0);
            let filtered: Vec<_> = q.to_vec().unwrap();
            let expected_take_filtered: Vec<_> =
                filtered.iter().copied().take_while(|v| *v < limit).collect();
            let expected_skip_filtered: Vec<_> =
                filtered.iter().copied().skip_while(|v| *v < limit).collect();

            assert_eq!(expected_take_filtered, q.take_while(move |v| *v < limit).to_vec().unwrap());
            assert_eq!(expected_skip_filtered, q.skip_while(move |v| *v < limit).to_vec().unwrap());

            let unfiltered = parallel(expected_take.iter().chain(&expected_skip).copied().collect(), dop)
                .as_ordered();
            assert_eq!(expected_take, unfiltered.take_while(move |v| *v < limit).to_vec().unwrap());
            assert_eq!(expected_skip, unfiltered.skip_while(move |v| *v < limit).to_vec().unwrap());
        }
    }
}
