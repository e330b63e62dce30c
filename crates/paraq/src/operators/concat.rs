use std::sync::Arc;

use paraq_error::{DbError, Result};

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{
    BinaryOperator, BinaryQueryResults, IndexedQueryResults, IndexedResults, QueryOperator,
    QueryResults, SequentialIter, try_indexed,
};
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Yields everything from the left input followed by everything from the
/// right.
///
/// Keys are tagged with their side, and the combined comparer orders every
/// left key before any right key.
pub struct ConcatOperator<T: Element> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
    left_premature_merge: bool,
    right_premature_merge: bool,
}

impl<T: Element> ConcatOperator<T> {
    pub fn new(left: Arc<dyn QueryOperator<T>>, right: Arc<dyn QueryOperator<T>>) -> Self {
        let (_, left_premature_merge) =
            OrdinalIndexState::require(left.ordinal_index_state(), OrdinalIndexState::Increasing);
        let (_, right_premature_merge) =
            OrdinalIndexState::require(right.ordinal_index_state(), OrdinalIndexState::Increasing);

        ConcatOperator {
            left,
            right,
            left_premature_merge,
            right_premature_merge,
        }
    }
}

impl<T: Element> QueryOperator<T> for ConcatOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let left = self.left.clone().open(cx)?;
        let right = self.right.clone().open(cx)?;

        if let (Some(left), Some(right)) = (try_indexed(&left)?, try_indexed(&right)?) {
            return Ok(Arc::new(IndexedQueryResults::new(Arc::new(ConcatIndexed {
                left,
                right,
            }))));
        }

        let (left_pm, right_pm) = (self.left_premature_merge, self.right_premature_merge);
        Ok(Arc::new(BinaryQueryResults::new(left, right, self, left_pm, right_pm)))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        let left = self.left.ordinal_index_state();
        let right = self.right.ordinal_index_state();
        if left == OrdinalIndexState::Indexible && right == OrdinalIndexState::Indexible {
            return OrdinalIndexState::Indexible;
        }
        left.worse(right).worse(OrdinalIndexState::Increasing)
    }

    fn output_ordered(&self) -> bool {
        self.left.output_ordered() || self.right.output_ordered()
    }

    fn limits_parallelism(&self) -> bool {
        self.left_premature_merge
            || self.right_premature_merge
            || self.left.limits_parallelism()
            || self.right.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        (!self.left_premature_merge && self.left.uses_barriers())
            || (!self.right_premature_merge && self.right.uses_barriers())
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let left = self.left.as_sequential(cx)?;
        let right = self.right.as_sequential(cx)?;
        Ok(Box::new(left.chain(right)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Concat")
            .with_value("ordinal_state", self.ordinal_index_state())
            .with_values("premature_merge", [self.left_premature_merge, self.right_premature_merge])
            .with_child(self.left.explain_entry())
            .with_child(self.right.explain_entry())
    }
}

impl<T: Element> BinaryOperator<T, T> for ConcatOperator<T> {
    fn wrap_partitioned_streams(
        &self,
        left: PartitionedStream<T>,
        right: PartitionedStream<T>,
        _cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        if left.partition_count() != right.partition_count() {
            return Err(DbError::internal("Concat inputs have different partition counts")
                .with_field("left", left.partition_count())
                .with_field("right", right.partition_count()));
        }

        let state = left
            .ordinal_index_state()
            .worse(right.ordinal_index_state())
            .worse(OrdinalIndexState::Increasing);
        let (left_parts, left_comparer, _) = left.into_parts();
        let (right_parts, right_comparer, _) = right.into_parts();

        let partitions = left_parts
            .into_iter()
            .zip(right_parts)
            .map(|(left, right)| {
                Box::new(ConcatEnumerator {
                    left: Some(left),
                    right: Some(right),
                }) as BoxedEnumerator<T>
            })
            .collect();

        PartitionedStream::try_new(
            partitions,
            KeyComparer::concat(left_comparer, right_comparer),
            state,
        )
    }
}

struct ConcatIndexed<T> {
    left: Arc<dyn IndexedResults<T>>,
    right: Arc<dyn IndexedResults<T>>,
}

impl<T: Element> IndexedResults<T> for ConcatIndexed<T> {
    fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    fn get(&self, index: usize) -> T {
        let left_len = self.left.len();
        if index < left_len {
            self.left.get(index)
        } else {
            self.right.get(index - left_len)
        }
    }
}

struct ConcatEnumerator<T> {
    /// Dropped once exhausted.
    left: Option<BoxedEnumerator<T>>,
    right: Option<BoxedEnumerator<T>>,
}

impl<T: Element> QueryOperatorEnumerator<T> for ConcatEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if let Some(left) = self.left.as_mut() {
            match left.move_next()? {
                Some((element, key)) => return Ok(Some((element, OrderKey::Left(Box::new(key))))),
                None => self.left = None,
            }
        }
        if let Some(right) = self.right.as_mut() {
            match right.move_next()? {
                Some((element, key)) => return Ok(Some((element, OrderKey::Right(Box::new(key))))),
                None => self.right = None,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn concat_lists_is_indexible() {
        let left = parallel(vec![5, 3, 8], 2).as_ordered();
        let right = parallel(vec![1, 9, 2], 2);
        let q = left.concat(&right);
        assert_eq!(OrdinalIndexState::Indexible, q.ordinal_index_state());
        assert_eq!(vec![5, 3, 8, 1, 9, 2], q.to_vec().unwrap());
    }

    #[test]
    fn concat_streaming() {
        let left = parallel((0..100).collect::<Vec<i32>>(), 3)
            .as_ordered()
            .filter(|v| v % 3 == 0);
        let right = parallel((0..100).collect::<Vec<i32>>(), 3)
            .as_ordered()
            .filter(|v| v % 4 == 0);
        let expected: Vec<_> = (0..100)
            .filter(|v| v % 3 == 0)
            .chain((0..100).filter(|v| v % 4 == 0))
            .collect();
        assert_eq!(expected, left.concat(&right).to_vec().unwrap());
    }

    #[test]
    fn concat_shuffled_side_merges() {
        let left = parallel(vec![3, 1, 3, 2], 2).as_ordered().distinct();
        let right = parallel(vec![7, 8], 2).as_ordered();
        let q = left.concat(&right);
        assert!(q.explain().contains("premature_merge = [true, false]"));
        assert_eq!(vec![3, 1, 2, 7, 8], q.to_vec().unwrap());
    }

    #[test]
    fn concat_unordered_has_everything() {
        let left = parallel(vec![1, 2, 3], 4).filter(|_| true);
        let right = parallel(vec![4, 5], 4).filter(|_| true);
        assert_eq!(vec![1, 2, 3, 4, 5], sorted(left.concat(&right).to_vec().unwrap()));
    }
}
