use std::sync::Arc;

use paraq_error::Result;

use super::ElementPredicate;
use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::OrderKey;
use crate::ordinal::OrdinalIndexState;
use crate::query::{
    QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults,
};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Keeps elements matching a predicate.
///
/// Filtering leaves gaps in the keys, so the output is at best `Increasing`.
/// A positional predicate needs `Correct` keys.
pub struct FilterOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    predicate: ElementPredicate<T>,
    state: OrdinalIndexState,
    premature_merge: bool,
}

impl<T: Element> FilterOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, predicate: ElementPredicate<T>) -> Self {
        let required = if predicate.is_indexed() {
            OrdinalIndexState::Correct
        } else {
            OrdinalIndexState::Shuffled
        };
        let (input, premature_merge) =
            OrdinalIndexState::require(child.ordinal_index_state(), required);

        FilterOperator {
            child,
            predicate,
            state: input.worse(OrdinalIndexState::Increasing),
            premature_merge,
        }
    }
}

impl<T: Element> QueryOperator<T> for FilterOperator<T> {
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
        !self.premature_merge && self.child.uses_barriers()
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let input = self.child.as_sequential(cx)?;
        let predicate = self.predicate.clone();
        Ok(Box::new(input.enumerate().filter_map(
            move |(idx, item)| match item {
                Ok(v) => predicate.evaluate(&v, idx).then_some(Ok(v)),
                Err(e) => Some(Err(e)),
            },
        )))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Filter")
            .with_value("indexed", self.predicate.is_indexed())
            .with_value("ordinal_state", self.state)
            .with_value("premature_merge", self.premature_merge)
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for FilterOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        Ok(input.wrap_partitions(self.state, |_, source| {
            Box::new(FilterEnumerator {
                source,
                predicate: self.predicate.clone(),
                poller: cx.cancellation().poller(),
            })
        }))
    }
}

struct FilterEnumerator<T> {
    source: BoxedEnumerator<T>,
    predicate: ElementPredicate<T>,
    poller: CancellationPoller,
}

impl<T: Element> QueryOperatorEnumerator<T> for FilterEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        while let Some((element, key)) = self.source.move_next()? {
            self.poller.tick()?;
            if self.predicate.evaluate_keyed(&element, &key)? {
                return Ok(Some((element, key)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn filter_scenario() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .filter(|v| *v > 2)
            .to_vec()
            .unwrap();
        assert_eq!(vec![3, 5, 8, 9], sorted(out));
    }

    #[test]
    fn filter_matches_sequential_random() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for dop in [1, 2, 3, 8] {
            let len = rng.random_range(0..2000);
            let values: Vec<i32> = (0..len).map(|_| rng.random_range(-100..100)).collect();

            let expected: Vec<_> = values.iter().copied().filter(|v| v % 3 == 0).collect();
            let got = parallel(values, dop)
                .as_ordered()
                .filter(|v| v % 3 == 0)
                .to_vec()
                .unwrap();
            assert_eq!(expected, got, "dop: {dop}");
        }
    }

    #[test]
    fn filter_indexed_uses_positions() {
        let q = parallel(vec![10, 11, 12, 13, 14, 15], 3)
            .as_ordered()
            .filter(|v| v % 2 == 0)
            .filter_indexed(|_, idx| idx % 2 == 0);
        // Positions are those of the filtered sequence: [10, 12, 14].
        assert_eq!(vec![10, 14], q.to_vec().unwrap());
        assert!(q.explain().contains("premature_merge = true"));
    }

    #[test]
    fn state_degrades_to_increasing() {
        let q = parallel(vec![1, 2, 3], 2).filter(|_| true);
        assert_eq!(OrdinalIndexState::Increasing, q.ordinal_index_state());
    }
}
