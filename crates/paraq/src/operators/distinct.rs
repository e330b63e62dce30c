use std::hash::Hash;
use std::sync::Arc;

use paraq_error::Result;

use super::KeySelector;
use crate::Element;
use crate::exchange::hash_repartition::hash_repartition;
use crate::exchange::{HashMap, HashSet, hash_value, new_hash_map, new_hash_set};
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Removes elements whose key was already seen.
///
/// Input is hash repartitioned on the key so duplicates meet in the same
/// partition. Unordered queries stream, yielding the first occurrence seen by
/// a partition. Ordered queries keep the occurrence with the lowest order key,
/// which requires consuming the whole partition first.
pub struct DistinctOperator<T: Element, K> {
    child: Arc<dyn QueryOperator<T>>,
    key_selector: KeySelector<T, K>,
}

impl<T, K> DistinctOperator<T, K>
where
    T: Element,
    K: Element + Hash + Eq,
{
    pub fn new(child: Arc<dyn QueryOperator<T>>, key_selector: KeySelector<T, K>) -> Self {
        DistinctOperator {
            child,
            key_selector,
        }
    }
}

impl<T, K> QueryOperator<T> for DistinctOperator<T, K>
where
    T: Element,
    K: Element + Hash + Eq,
{
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone();
        UnaryQueryResults::open(&child, self, false, cx)
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Shuffled
    }

    fn output_ordered(&self) -> bool {
        self.child.output_ordered()
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let input = self.child.as_sequential(cx)?;
        let key_selector = self.key_selector.clone();
        let mut seen: HashSet<K> = new_hash_set();
        Ok(Box::new(input.filter(move |item| match item {
            Ok(element) => seen.insert(key_selector(element)),
            Err(_) => true,
        })))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Distinct").with_child(self.child.explain_entry())
    }
}

impl<T, K> UnaryOperator<T, T> for DistinctOperator<T, K>
where
    T: Element,
    K: Element + Hash + Eq,
{
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let preserve_order = self.child.output_ordered();
        let key_selector = &self.key_selector;
        let input = hash_repartition(input, |v| hash_value(&key_selector(v)), preserve_order, cx)?;
        let comparer = input.comparer().clone();

        Ok(input.wrap_partitions(OrdinalIndexState::Shuffled, |_, source| {
            let poller = cx.cancellation().poller();
            if preserve_order {
                Box::new(OrderedDistinctEnumerator {
                    source: Some(source),
                    key_selector: self.key_selector.clone(),
                    comparer: comparer.clone(),
                    output: Vec::new().into_iter(),
                    poller,
                }) as BoxedEnumerator<T>
            } else {
                Box::new(DistinctEnumerator {
                    source,
                    key_selector: self.key_selector.clone(),
                    seen: new_hash_set(),
                    poller,
                }) as BoxedEnumerator<T>
            }
        }))
    }
}

struct DistinctEnumerator<T, K> {
    source: BoxedEnumerator<T>,
    key_selector: KeySelector<T, K>,
    seen: HashSet<K>,
    poller: CancellationPoller,
}

impl<T, K> QueryOperatorEnumerator<T> for DistinctEnumerator<T, K>
where
    T: Element,
    K: Element + Hash + Eq,
{
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        while let Some((element, key)) = self.source.move_next()? {
            self.poller.tick()?;
            if self.seen.insert((self.key_selector)(&element)) {
                return Ok(Some((element, key)));
            }
        }
        Ok(None)
    }
}

struct OrderedDistinctEnumerator<T, K> {
    /// Taken once the partition is consumed.
    source: Option<BoxedEnumerator<T>>,
    key_selector: KeySelector<T, K>,
    comparer: KeyComparer,
    output: std::vec::IntoIter<(T, OrderKey)>,
    poller: CancellationPoller,
}

impl<T, K> QueryOperatorEnumerator<T> for OrderedDistinctEnumerator<T, K>
where
    T: Element,
    K: Element + Hash + Eq,
{
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if let Some(mut source) = self.source.take() {
            let mut lowest: HashMap<K, (T, OrderKey)> = new_hash_map();
            while let Some((element, key)) = source.move_next()? {
                self.poller.tick()?;
                let distinct_key = (self.key_selector)(&element);
                match lowest.get_mut(&distinct_key) {
                    Some(existing) => {
                        if self.comparer.compare(&key, &existing.1).is_lt() {
                            *existing = (element, key);
                        }
                    }
                    None => {
                        lowest.insert(distinct_key, (element, key));
                    }
                }
            }
            self.output = lowest.into_values().collect::<Vec<_>>().into_iter();
        }
        Ok(self.output.next())
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn distinct_ordered_keeps_first_occurrence() {
        let out = parallel(vec![3, 1, 3, 2, 1, 4, 2], 3)
            .as_ordered()
            .distinct()
            .to_vec()
            .unwrap();
        assert_eq!(vec![3, 1, 2, 4], out);
    }

    #[test]
    fn distinct_by_key() {
        let words = vec!["apple", "Avocado", "banana", "Blueberry", "cherry"];
        let out = parallel(words, 2)
            .as_ordered()
            .distinct_by(|w| w.to_ascii_lowercase().as_bytes()[0])
            .to_vec()
            .unwrap();
        assert_eq!(vec!["apple", "banana", "cherry"], out);
    }

    #[test]
    fn distinct_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let values: Vec<u16> = (0..4000).map(|_| rng.random_range(0..300)).collect();

        let once = parallel(values.clone(), 4).distinct().to_vec().unwrap();
        let twice = parallel(values.clone(), 4)
            .distinct()
            .distinct()
            .to_vec()
            .unwrap();

        let mut expected = values;
        expected.sort();
        expected.dedup();

        assert_eq!(expected, sorted(once));
        assert_eq!(expected, sorted(twice));
    }
}
