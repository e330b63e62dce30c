use std::sync::Arc;

use paraq_error::{OptionExt, Result};

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::OrderKey;
use crate::ordinal::OrdinalIndexState;
use crate::query::{
    IndexedQueryResults, IndexedResults, QueryOperator, QueryResults, SequentialIter,
    UnaryOperator, UnaryQueryResults, try_indexed,
};
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Projection applied to every element, optionally receiving the element's
/// position.
pub enum Selector<T, U> {
    Plain(Arc<dyn Fn(T) -> U + Send + Sync>),
    Indexed(Arc<dyn Fn(T, usize) -> U + Send + Sync>),
}

impl<T, U> Clone for Selector<T, U> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(f) => Self::Plain(f.clone()),
            Self::Indexed(f) => Self::Indexed(f.clone()),
        }
    }
}

impl<T, U> Selector<T, U> {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed(_))
    }

    fn apply(&self, value: T, index: usize) -> U {
        match self {
            Self::Plain(f) => f(value),
            Self::Indexed(f) => f(value, index),
        }
    }

    fn apply_keyed(&self, value: T, key: &OrderKey) -> Result<U> {
        match self {
            Self::Plain(f) => Ok(f(value)),
            Self::Indexed(f) => {
                let index = key
                    .as_index()
                    .required("positional key for indexed selector")?;
                Ok(f(value, index))
            }
        }
    }
}

/// Projects every element. Keys pass through untouched.
pub struct MapOperator<T: Element, U> {
    child: Arc<dyn QueryOperator<T>>,
    selector: Selector<T, U>,
    state: OrdinalIndexState,
    premature_merge: bool,
}

impl<T: Element, U: Element> MapOperator<T, U> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, selector: Selector<T, U>) -> Self {
        let required = if selector.is_indexed() {
            OrdinalIndexState::Correct
        } else {
            OrdinalIndexState::Shuffled
        };
        let (state, premature_merge) =
            OrdinalIndexState::require(child.ordinal_index_state(), required);

        MapOperator {
            child,
            selector,
            state,
            premature_merge,
        }
    }
}

impl<T: Element, U: Element> QueryOperator<U> for MapOperator<T, U> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<U>>> {
        let child = self.child.clone().open(cx)?;
        if let Some(input) = try_indexed(&child)? {
            let results = MapIndexedResults {
                input,
                selector: self.selector.clone(),
            };
            return Ok(Arc::new(IndexedQueryResults::new(Arc::new(results))));
        }
        let premature_merge = self.premature_merge;
        Ok(Arc::new(UnaryQueryResults::new(child, self, premature_merge)))
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

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<U>> {
        let input = self.child.as_sequential(cx)?;
        let selector = self.selector.clone();
        Ok(Box::new(
            input
                .enumerate()
                .map(move |(idx, item)| item.map(|v| selector.apply(v, idx))),
        ))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Map")
            .with_value("indexed", self.selector.is_indexed())
            .with_value("ordinal_state", self.state)
            .with_value("premature_merge", self.premature_merge)
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element, U: Element> UnaryOperator<T, U> for MapOperator<T, U> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        _cx: &QueryContext,
    ) -> Result<PartitionedStream<U>> {
        Ok(input.wrap_partitions(self.state, |_, source| {
            Box::new(MapEnumerator {
                source,
                selector: self.selector.clone(),
            }) as BoxedEnumerator<U>
        }))
    }
}

struct MapEnumerator<T, U> {
    source: BoxedEnumerator<T>,
    selector: Selector<T, U>,
}

impl<T: Element, U: Element> QueryOperatorEnumerator<U> for MapEnumerator<T, U> {
    fn move_next(&mut self) -> Result<Option<(U, OrderKey)>> {
        match self.source.move_next()? {
            Some((element, key)) => {
                let mapped = self.selector.apply_keyed(element, &key)?;
                Ok(Some((mapped, key)))
            }
            None => Ok(None),
        }
    }
}

struct MapIndexedResults<T, U> {
    input: Arc<dyn IndexedResults<T>>,
    selector: Selector<T, U>,
}

impl<T: Element, U: Element> IndexedResults<U> for MapIndexedResults<T, U> {
    fn len(&self) -> usize {
        self.input.len()
    }

    fn get(&self, index: usize) -> U {
        self.selector.apply(self.input.get(index), index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParallelQuery;
    use crate::testutil::{parallel, test_settings};

    #[test]
    fn map_keeps_order() {
        let out = parallel(vec![5, 3, 8, 1, 9, 2], 2)
            .as_ordered()
            .map(|v| v * 10)
            .to_vec()
            .unwrap();
        assert_eq!(vec![50, 30, 80, 10, 90, 20], out);
    }

    #[test]
    fn map_over_list_stays_indexible() {
        let q = parallel(vec![1, 2, 3], 2).map(|v| v.to_string());
        assert_eq!(OrdinalIndexState::Indexible, q.ordinal_index_state());
    }

    #[test]
    fn map_indexed_after_filter() {
        let out = ParallelQuery::range(0, 10)
            .with_settings(test_settings(3))
            .as_ordered()
            .filter(|v| v % 3 == 0)
            .map_indexed(|v, idx| (idx, v))
            .to_vec()
            .unwrap();
        assert_eq!(vec![(0, 0), (1, 3), (2, 6), (3, 9)], out);
    }

    #[test]
    fn map_indexed_over_range_uses_index() {
        let out = ParallelQuery::range(100, 5)
            .with_settings(test_settings(2))
            .as_ordered()
            .map_indexed(|v, idx| v - idx as i64)
            .to_vec()
            .unwrap();
        assert_eq!(vec![100; 5], out);
    }
}
