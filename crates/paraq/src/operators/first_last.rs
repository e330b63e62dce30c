use std::cmp::Ordering;
use std::sync::Arc;

use paraq_error::Result;
use parking_lot::Mutex;
use tracing::trace;

use super::Predicate;
use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::sync::countdown::{BarrierArrival, CountdownEvent};

/// How often a partition searching for the first match checks if another
/// partition already found a lower key, minus one.
const CHAMPION_CHECK_MASK: usize = 0x3F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    /// Lowest keyed match.
    First,
    /// Highest keyed match.
    Last,
}

/// Finds the lowest (or highest) keyed element matching an optional
/// predicate.
///
/// Partitions search concurrently, recording the best key found so far in a
/// shared champion record. After every partition arrives at a barrier, only
/// the partition holding the champion yields its element. Yields at most one
/// element overall.
pub struct FirstLastOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    predicate: Option<Predicate<T>>,
    direction: SearchDirection,
    premature_merge: bool,
}

impl<T: Element> FirstLastOperator<T> {
    pub fn new(
        child: Arc<dyn QueryOperator<T>>,
        predicate: Option<Predicate<T>>,
        direction: SearchDirection,
    ) -> Self {
        let (_, premature_merge) = OrdinalIndexState::require(
            child.ordinal_index_state(),
            OrdinalIndexState::Increasing,
        );
        FirstLastOperator {
            child,
            predicate,
            direction,
            premature_merge,
        }
    }

    fn matches(&self, element: &T) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(element))
    }
}

impl<T: Element> QueryOperator<T> for FirstLastOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone();
        let premature_merge = self.premature_merge;
        UnaryQueryResults::open(&child, self, premature_merge, cx)
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Shuffled
    }

    fn output_ordered(&self) -> bool {
        false
    }

    fn limits_parallelism(&self) -> bool {
        self.premature_merge || self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        true
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let mut found = None;
        for item in self.child.as_sequential(cx)? {
            let element = item?;
            if self.matches(&element) {
                found = Some(element);
                if self.direction == SearchDirection::First {
                    break;
                }
            }
        }
        Ok(Box::new(found.into_iter().map(Ok)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        let name = match self.direction {
            SearchDirection::First => "First",
            SearchDirection::Last => "Last",
        };
        ExplainEntry::new(name)
            .with_value("predicate", self.predicate.is_some())
            .with_value("premature_merge", self.premature_merge)
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for FirstLastOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let shared = Arc::new(ChampionRecord {
            champion: Mutex::new(None),
            comparer: input.comparer().clone(),
            direction: self.direction,
        });
        let barrier = Arc::new(CountdownEvent::new(input.partition_count()));

        Ok(input.wrap_partitions(OrdinalIndexState::Shuffled, |partition, source| {
            Box::new(FirstLastEnumerator {
                source: Some(source),
                predicate: self.predicate.clone(),
                partition,
                shared: shared.clone(),
                barrier: barrier.clone(),
                arrival: BarrierArrival::new(barrier.clone()),
                poller: cx.cancellation().poller(),
                done: false,
            }) as BoxedEnumerator<T>
        }))
    }
}

#[derive(Debug)]
struct Champion {
    key: OrderKey,
    partition: usize,
}

/// Best key found by any partition.
#[derive(Debug)]
struct ChampionRecord {
    champion: Mutex<Option<Champion>>,
    comparer: KeyComparer,
    direction: SearchDirection,
}

impl ChampionRecord {
    /// Replace the champion if `key` is strictly better.
    fn offer(&self, key: &OrderKey, partition: usize) {
        let mut champion = self.champion.lock();
        let replace = match champion.as_ref() {
            None => true,
            Some(current) => {
                let ord = self.comparer.compare(key, &current.key);
                match self.direction {
                    SearchDirection::First => ord == Ordering::Less,
                    SearchDirection::Last => ord == Ordering::Greater,
                }
            }
        };
        if replace {
            *champion = Some(Champion {
                key: key.clone(),
                partition,
            });
        }
    }

    /// If some partition already found a match with a lower key. Only
    /// meaningful when searching for the first element.
    fn beats(&self, key: &OrderKey) -> bool {
        self.champion
            .lock()
            .as_ref()
            .is_some_and(|c| self.comparer.compare(&c.key, key) == Ordering::Less)
    }

    fn is_champion(&self, partition: usize) -> bool {
        self.champion
            .lock()
            .as_ref()
            .is_some_and(|c| c.partition == partition)
    }
}

struct FirstLastEnumerator<T> {
    /// Dropped once the search completes.
    source: Option<BoxedEnumerator<T>>,
    predicate: Option<Predicate<T>>,
    partition: usize,
    shared: Arc<ChampionRecord>,
    barrier: Arc<CountdownEvent>,
    arrival: BarrierArrival,
    poller: CancellationPoller,
    done: bool,
}

impl<T: Element> FirstLastEnumerator<T> {
    fn search(&mut self) -> Result<Option<(T, OrderKey)>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        let mut best = None;
        let mut count = 0usize;
        while let Some((element, key)) = source.move_next()? {
            self.poller.tick()?;

            if self.shared.direction == SearchDirection::First
                && count & CHAMPION_CHECK_MASK == 0
                && self.shared.beats(&key)
            {
                // Keys only increase within a partition, nothing left here can
                // beat the current champion.
                break;
            }
            count += 1;

            if !self.predicate.as_ref().is_none_or(|p| p(&element)) {
                continue;
            }
            best = Some((element, key));
            if self.shared.direction == SearchDirection::First {
                break;
            }
        }

        if let Some((_, key)) = &best {
            self.shared.offer(key, self.partition);
        }

        Ok(best)
    }
}

impl<T: Element> QueryOperatorEnumerator<T> for FirstLastEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let searched = self.search();
        self.source = None;
        self.arrival.arrive();
        let found = searched?;

        self.barrier.wait(self.poller.cancellation())?;
        trace!(partition = self.partition, found = found.is_some(), "first/last search complete");

        if self.shared.is_champion(self.partition) {
            Ok(found)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use paraq_error::ErrorKind;

    use super::*;
    use crate::ParallelQuery;
    use crate::testutil::{parallel, test_settings};

    #[test]
    fn first_is_lowest_index_match() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2);
        assert_eq!(5, q.first().unwrap());
        assert_eq!(Some(1), q.first_where(|v| *v < 3).unwrap());
        assert_eq!(None, q.first_where(|v| *v > 100).unwrap());
    }

    #[test]
    fn last_is_highest_index_match() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 3);
        assert_eq!(2, q.last().unwrap());
        assert_eq!(Some(9), q.last_where(|v| *v > 5).unwrap());
        assert_eq!(Some(3), q.last_where(|v| *v == 3).unwrap());
    }

    #[test]
    fn first_on_empty() {
        let q = parallel(Vec::<u8>::new(), 4);
        assert_eq!(ErrorKind::NoElements, q.first().unwrap_err().kind());
        assert_eq!(None, q.first_or_none().unwrap());
        assert_eq!(None, q.last_or_none().unwrap());
    }

    #[test]
    fn first_is_deterministic() {
        // Matches at every multiple of 1000 after 10_000. Lowest index must
        // win regardless of which partition finds a match first.
        let q = ParallelQuery::range(0, 100_000)
            .with_settings(test_settings(8))
            .filter(|v| *v >= 10_000);
        for _ in 0..20 {
            assert_eq!(Some(10_000), q.first_where(|v| v % 1000 == 0).unwrap());
        }
    }

    #[test]
    fn first_over_shuffled_input_merges() {
        let q = parallel(vec![4, 7, 1, 7, 4, 2], 2)
            .as_ordered()
            .distinct();
        assert_eq!(4, q.first().unwrap());
        assert_eq!(2, q.last().unwrap());
    }
}
