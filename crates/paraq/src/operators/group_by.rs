use std::hash::Hash;
use std::sync::Arc;

use paraq_error::Result;
use tracing::trace;

use super::KeySelector;
use crate::Element;
use crate::exchange::hash_repartition::hash_repartition;
use crate::exchange::{HashMap, hash_value, new_hash_map};
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, EmptyEnumerator, PartitionedStream, QueryOperatorEnumerator};
use crate::util::list_chunk::ListChunk;

pub type ElementSelector<T, E> = Arc<dyn Fn(T) -> E + Send + Sync>;

/// Elements sharing a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping<K, E> {
    key: K,
    elements: Vec<E>,
}

impl<K, E> Grouping<K, E> {
    pub fn new(key: K, elements: Vec<E>) -> Self {
        Grouping { key, elements }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn elements(&self) -> &[E] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_parts(self) -> (K, Vec<E>) {
        (self.key, self.elements)
    }
}

impl<K, E> IntoIterator for Grouping<K, E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

/// Groups elements by key.
///
/// Input is hash repartitioned on the key so every group is built entirely
/// within one partition. When the query is ordered, groups are keyed by the
/// lowest key of their elements and elements within a group keep their
/// input order.
pub struct GroupByOperator<T: Element, K, E> {
    child: Arc<dyn QueryOperator<T>>,
    key_selector: KeySelector<T, K>,
    element_selector: ElementSelector<T, E>,
}

impl<T, K, E> GroupByOperator<T, K, E>
where
    T: Element,
    K: Element + Hash + Eq,
    E: Element,
{
    pub fn new(
        child: Arc<dyn QueryOperator<T>>,
        key_selector: KeySelector<T, K>,
        element_selector: ElementSelector<T, E>,
    ) -> Self {
        GroupByOperator {
            child,
            key_selector,
            element_selector,
        }
    }
}

impl<T, K, E> QueryOperator<Grouping<K, E>> for GroupByOperator<T, K, E>
where
    T: Element,
    K: Element + Hash + Eq,
    E: Element,
{
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<Grouping<K, E>>>> {
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

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<Grouping<K, E>>> {
        let mut table = GroupTable::default();
        for item in self.child.as_sequential(cx)? {
            let element = item?;
            let key = (self.key_selector)(&element);
            table.insert(key, (self.element_selector)(element), OrderKey::None, None);
        }
        let groups = table.into_groups(None);
        Ok(Box::new(groups.into_iter().map(|(group, _)| Ok(group))))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("GroupBy").with_child(self.child.explain_entry())
    }
}

impl<T, K, E> UnaryOperator<T, Grouping<K, E>> for GroupByOperator<T, K, E>
where
    T: Element,
    K: Element + Hash + Eq,
    E: Element,
{
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<Grouping<K, E>>> {
        let preserve_order = self.child.output_ordered();
        let state = input.ordinal_index_state();

        let pairs = input.wrap_partitions(state, |_, source| {
            Box::new(KeyPairEnumerator {
                source,
                key_selector: self.key_selector.clone(),
                element_selector: self.element_selector.clone(),
            }) as BoxedEnumerator<(K, E)>
        });

        let repartitioned = hash_repartition(pairs, |(key, _)| hash_value(key), preserve_order, cx)?;
        let comparer = repartitioned.comparer().clone();

        Ok(repartitioned.wrap_partitions(OrdinalIndexState::Shuffled, |partition, source| {
            Box::new(GroupByEnumerator {
                state: GroupState::NotBuilt(source),
                partition,
                comparer: preserve_order.then(|| comparer.clone()),
                poller: cx.cancellation().poller(),
            }) as BoxedEnumerator<Grouping<K, E>>
        }))
    }
}

/// Computes the grouping key for each element ahead of repartitioning.
struct KeyPairEnumerator<T, K, E> {
    source: BoxedEnumerator<T>,
    key_selector: KeySelector<T, K>,
    element_selector: ElementSelector<T, E>,
}

impl<T, K, E> QueryOperatorEnumerator<(K, E)> for KeyPairEnumerator<T, K, E>
where
    T: Element,
    K: Element,
    E: Element,
{
    fn move_next(&mut self) -> Result<Option<((K, E), OrderKey)>> {
        Ok(self.source.move_next()?.map(|(element, key)| {
            let group_key = (self.key_selector)(&element);
            ((group_key, (self.element_selector)(element)), key)
        }))
    }
}

struct PendingGroup<K, E> {
    key: K,
    elements: ListChunk<(E, OrderKey)>,
    /// Lowest order key of any element, only tracked for ordered queries.
    min_key: OrderKey,
}

/// Groups in order of first insertion.
struct GroupTable<K, E> {
    index: HashMap<K, usize>,
    groups: Vec<PendingGroup<K, E>>,
}

impl<K, E> Default for GroupTable<K, E> {
    fn default() -> Self {
        GroupTable {
            index: new_hash_map(),
            groups: Vec::new(),
        }
    }
}

impl<K, E> GroupTable<K, E>
where
    K: Clone + Hash + Eq,
{
    fn insert(&mut self, key: K, element: E, order: OrderKey, comparer: Option<&KeyComparer>) {
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                let idx = self.groups.len();
                self.index.insert(key.clone(), idx);
                self.groups.push(PendingGroup {
                    key,
                    elements: ListChunk::new(),
                    min_key: order.clone(),
                });
                idx
            }
        };

        let group = &mut self.groups[idx];
        if comparer.is_some_and(|c| c.compare(&order, &group.min_key).is_lt()) {
            group.min_key = order.clone();
        }
        group.elements.push((element, order));
    }

    /// Finish building, returning each group with its order key.
    ///
    /// With a comparer, elements in each group are sorted by their order
    /// keys.
    fn into_groups(self, comparer: Option<&KeyComparer>) -> Vec<(Grouping<K, E>, OrderKey)> {
        self.groups
            .into_iter()
            .map(|group| {
                let mut elements = group.elements.into_vec();
                if let Some(comparer) = comparer {
                    elements.sort_by(|a, b| comparer.compare(&a.1, &b.1));
                }
                let elements = elements.into_iter().map(|(e, _)| e).collect();
                let key = match comparer {
                    Some(_) => group.min_key,
                    None => OrderKey::None,
                };
                (Grouping::new(group.key, elements), key)
            })
            .collect()
    }
}

enum GroupState<K, E> {
    NotBuilt(BoxedEnumerator<(K, E)>),
    Built(std::vec::IntoIter<(Grouping<K, E>, OrderKey)>),
}

struct GroupByEnumerator<K, E> {
    state: GroupState<K, E>,
    partition: usize,
    /// Set when the query is ordered.
    comparer: Option<KeyComparer>,
    poller: CancellationPoller,
}

impl<K, E> GroupByEnumerator<K, E>
where
    K: Element + Hash + Eq,
    E: Element,
{
    fn build(&mut self, source: &mut BoxedEnumerator<(K, E)>) -> Result<Vec<(Grouping<K, E>, OrderKey)>> {
        let mut table = GroupTable::default();
        while let Some(((key, element), order)) = source.move_next()? {
            self.poller.tick()?;
            table.insert(key, element, order, self.comparer.as_ref());
        }
        trace!(partition = self.partition, groups = table.groups.len(), "built groups");
        Ok(table.into_groups(self.comparer.as_ref()))
    }
}

impl<K, E> QueryOperatorEnumerator<Grouping<K, E>> for GroupByEnumerator<K, E>
where
    K: Element + Hash + Eq,
    E: Element,
{
    fn move_next(&mut self) -> Result<Option<(Grouping<K, E>, OrderKey)>> {
        if let GroupState::NotBuilt(source) = &mut self.state {
            let mut source: BoxedEnumerator<(K, E)> =
                std::mem::replace(source, Box::new(EmptyEnumerator));
            let groups = self.build(&mut source)?;
            self.state = GroupState::Built(groups.into_iter());
        }

        match &mut self.state {
            GroupState::Built(groups) => Ok(groups.next()),
            GroupState::NotBuilt(_) => Ok(None),
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
    fn group_scenario_ordered() {
        let groups = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .as_ordered()
            .group_by(|v| v % 2)
            .to_vec()
            .unwrap();

        assert_eq!(
            vec![Grouping::new(1, vec![5, 3, 1, 9]), Grouping::new(0, vec![8, 2])],
            groups
        );
    }

    #[test]
    fn group_scenario_unordered() {
        let mut groups = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .group_by(|v| v % 2)
            .to_vec()
            .unwrap();
        groups.sort_by_key(|g| *g.key());

        assert_eq!(2, groups.len());
        assert_eq!(0, *groups[0].key());
        let mut evens = groups[0].elements().to_vec();
        evens.sort();
        assert_eq!(vec![2, 8], evens);
        let mut odds = groups[1].elements().to_vec();
        odds.sort();
        assert_eq!(vec![1, 3, 5, 9], odds);
    }

    #[test]
    fn group_by_with_element_selector() {
        let words = vec!["apple", "avocado", "banana", "blueberry", "cherry"];
        let groups = parallel(words, 3)
            .as_ordered()
            .group_by_with_element(|w| w.as_bytes()[0], |w| w.len())
            .to_vec()
            .unwrap();

        let got: Vec<_> = groups.into_iter().map(Grouping::into_parts).collect();
        assert_eq!(vec![(b'a', vec![5, 7]), (b'b', vec![6, 9]), (b'c', vec![6])], got);
    }

    #[test]
    fn groups_are_complete() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let values: Vec<u32> = (0..3000).map(|_| rng.random_range(0..50)).collect();

        let groups = parallel(values.clone(), 4)
            .group_by(|v| *v)
            .to_vec()
            .unwrap();

        let mut seen: Vec<u32> = groups.iter().map(|g| *g.key()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(groups.len(), seen.len(), "duplicate groups");

        let total: usize = groups.iter().map(Grouping::len).sum();
        assert_eq!(values.len(), total);
        for group in &groups {
            assert!(group.elements().iter().all(|v| v == group.key()));
            let expected = values.iter().filter(|v| *v == group.key()).count();
            assert_eq!(expected, group.len());
        }
    }

    #[test]
    fn empty_input_has_no_groups() {
        let groups = parallel(Vec::<i32>::new(), 3)
            .group_by(|v| *v)
            .to_vec()
            .unwrap();
        assert!(groups.is_empty());
    }
}
