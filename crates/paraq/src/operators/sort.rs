use std::cmp::Ordering;
use std::sync::Arc;

use paraq_error::Result;
use tracing::trace;

use super::KeySelector;
use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::source::ListSource;
use crate::query::{QueryOperator, QueryResults, SequentialIter};
use crate::runtime::context::QueryContext;
use crate::stream::PartitionedStream;
use crate::stream::merge::merge_sorted_runs;
use crate::stream::partition::partition_indexed;

pub type KeyCompareFn<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Comparer with the opposite ordering of `compare`.
pub fn reverse_compare<K: 'static>(compare: KeyCompareFn<K>) -> KeyCompareFn<K> {
    Arc::new(move |a: &K, b: &K| compare(b, a))
}

/// Comparer for a composite key. Compares the first component, falling back
/// to the second only on ties.
pub fn then_compare<K1, K2>(
    first: KeyCompareFn<K1>,
    second: KeyCompareFn<K2>,
) -> KeyCompareFn<(K1, K2)>
where
    K1: 'static,
    K2: 'static,
{
    Arc::new(move |a: &(K1, K2), b: &(K1, K2)| first(&a.0, &b.0).then_with(|| second(&a.1, &b.1)))
}

/// Sorts all elements by a key.
///
/// Sorting needs the entire input, so nothing is yielded until everything
/// has been sorted. Each partition sorts its own input in parallel, then the
/// sorted runs are merged and re-partitioned by position. Ties are broken by
/// the input's order keys.
pub struct SortOperator<T: Element, K> {
    child: Arc<dyn QueryOperator<T>>,
    key_selector: KeySelector<T, K>,
    compare: KeyCompareFn<K>,
    /// Number of sort keys, for explain output.
    key_count: usize,
}

impl<T, K> SortOperator<T, K>
where
    T: Element,
    K: Send + Sync + 'static,
{
    pub fn new(
        child: Arc<dyn QueryOperator<T>>,
        key_selector: KeySelector<T, K>,
        compare: KeyCompareFn<K>,
        key_count: usize,
    ) -> Self {
        SortOperator {
            child,
            key_selector,
            compare,
            key_count,
        }
    }

    fn compare_entries(
        &self,
        a: &(K, OrderKey, T),
        b: &(K, OrderKey, T),
        order: &KeyComparer,
    ) -> Ordering {
        (self.compare)(&a.0, &b.0).then_with(|| order.compare(&a.1, &b.1))
    }

    fn sort_stream(&self, input: PartitionedStream<T>, cx: &QueryContext) -> Result<Vec<T>> {
        let (partitions, order, _) = input.into_parts();

        let scheduler = cx.scheduler()?;
        let runs = scheduler.run_partitions(partitions, cx.cancellation(), |partition, mut source| {
            let mut poller = cx.cancellation().poller();
            let mut run = Vec::new();
            while let Some((element, key)) = source.move_next()? {
                poller.tick()?;
                run.push(((self.key_selector)(&element), key, element));
            }
            run.sort_by(|a, b| self.compare_entries(a, b, &order));
            trace!(partition, len = run.len(), "sorted partition run");
            Ok(run)
        })?;

        let merged = merge_sorted_runs(runs, |a, b| self.compare_entries(a, b, &order));
        Ok(merged.into_iter().map(|(_, _, element)| element).collect())
    }
}

impl<T, K> QueryOperator<T> for SortOperator<T, K>
where
    T: Element,
    K: Send + Sync + 'static,
{
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone().open(cx)?;
        Ok(Arc::new(SortQueryResults { child, op: self }))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Correct
    }

    fn output_ordered(&self) -> bool {
        true
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let mut keyed = Vec::new();
        for item in self.child.as_sequential(cx)? {
            let element = item?;
            keyed.push(((self.key_selector)(&element), element));
        }
        keyed.sort_by(|a, b| (self.compare)(&a.0, &b.0));
        Ok(Box::new(keyed.into_iter().map(|(_, element)| Ok(element))))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Sort")
            .with_value("keys", self.key_count)
            .with_child(self.child.explain_entry())
    }
}

struct SortQueryResults<T: Element, K> {
    child: Arc<dyn QueryResults<T>>,
    op: Arc<SortOperator<T, K>>,
}

impl<T, K> QueryResults<T> for SortQueryResults<T, K>
where
    T: Element,
    K: Send + Sync + 'static,
{
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<T>> {
        let input = self.child.clone().give_partitioned_stream(cx)?;
        let sorted = self.op.sort_stream(input, cx)?;
        partition_indexed(Arc::new(ListSource::new(sorted)), cx)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::testutil::parallel;

    #[test]
    fn sort_scenario() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .order_by(|v| *v)
            .to_vec()
            .unwrap();
        assert_eq!(vec![1, 2, 3, 5, 8, 9], out);
    }

    #[test]
    fn sort_descending() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 3)
            .order_by_descending(|v| *v)
            .to_vec()
            .unwrap();
        assert_eq!(vec![9, 8, 5, 3, 2, 1], out);
    }

    #[test]
    fn then_by_breaks_ties() {
        let people = vec![
            ("carol", 30),
            ("alice", 25),
            ("bob", 30),
            ("dave", 25),
            ("erin", 40),
        ];
        let out = parallel(people, 2)
            .order_by(|p| p.1)
            .then_by_descending(|p| p.0)
            .to_vec()
            .unwrap();
        assert_eq!(
            vec![("dave", 25), ("alice", 25), ("carol", 30), ("bob", 30), ("erin", 40)],
            out
        );
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let values: Vec<(u8, usize)> = (0..200).map(|i| ((i % 4) as u8, i)).collect();
        let out = parallel(values, 4).order_by(|v| v.0).to_vec().unwrap();
        for pair in out.windows(2) {
            assert!(pair[0].0 <= pair[1].0);
            if pair[0].0 == pair[1].0 {
                assert!(pair[0].1 < pair[1].1);
            }
        }
    }

    #[test]
    fn sort_random_matches_std() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let values: Vec<i64> = (0..5000).map(|_| rng.random_range(-1000..1000)).collect();

        let mut expected = values.clone();
        expected.sort();

        let out = parallel(values, 6).order_by(|v| *v).to_vec().unwrap();
        assert_eq!(expected, out);
    }

    #[test]
    fn operators_after_sort_see_sorted_positions() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .order_by(|v| *v)
            .into_query()
            .take(2)
            .to_vec()
            .unwrap();
        assert_eq!(vec![1, 2], out);
    }

    #[test]
    fn panic_while_merging_runs_is_user_code_error() {
        // Only elements from different runs are ever 50 or more apart.
        let err = parallel((0..100).collect::<Vec<u32>>(), 2)
            .order_by_with(
                |v| *v,
                |a: &u32, b: &u32| {
                    if a.abs_diff(*b) >= 50 {
                        panic!("incomparable keys");
                    }
                    a.cmp(b)
                },
            )
            .to_vec()
            .unwrap_err();

        assert_eq!(paraq_error::ErrorKind::UserCode, err.kind());
        assert!(err.get_msg().contains("incomparable keys"));
    }
}
