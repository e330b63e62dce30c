use std::sync::Arc;

use paraq_error::Result;

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::OrderKey;
use crate::ordinal::OrdinalIndexState;
use crate::query::{
    IndexedQueryResults, IndexedResults, QueryOperator, QueryResults, SequentialIter, UnaryOperator,
    UnaryQueryResults, try_indexed,
};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Reverses the order of the input.
///
/// Each partition buffers its input and yields it backwards. Keys are kept
/// and the stream's comparer is reversed, so merging by key produces the
/// reversed sequence.
pub struct ReverseOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
}

impl<T: Element> ReverseOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>) -> Self {
        ReverseOperator { child }
    }
}

impl<T: Element> QueryOperator<T> for ReverseOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let child = self.child.clone().open(cx)?;
        if let Some(indexed) = try_indexed(&child)? {
            return Ok(Arc::new(IndexedQueryResults::new(Arc::new(ReversedIndexed {
                inner: indexed,
            }))));
        }
        Ok(Arc::new(UnaryQueryResults::new(child, self, false)))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        match self.child.ordinal_index_state() {
            OrdinalIndexState::Indexible => OrdinalIndexState::Indexible,
            other => other.worse(OrdinalIndexState::Increasing),
        }
    }

    fn output_ordered(&self) -> bool {
        self.child.output_ordered()
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        self.child.uses_barriers()
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let values = self.child.as_sequential(cx)?.collect::<Result<Vec<_>>>()?;
        Ok(Box::new(values.into_iter().rev().map(Ok)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Reverse")
            .with_value("ordinal_state", self.ordinal_index_state())
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for ReverseOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let state = input.ordinal_index_state().worse(OrdinalIndexState::Increasing);
        let comparer = input.comparer().clone().reverse();

        Ok(input
            .wrap_partitions(state, |_, source| {
                Box::new(ReverseEnumerator {
                    source: Some(source),
                    buffer: Vec::new(),
                    poller: cx.cancellation().poller(),
                }) as BoxedEnumerator<T>
            })
            .with_comparer(comparer))
    }
}

struct ReversedIndexed<T> {
    inner: Arc<dyn IndexedResults<T>>,
}

impl<T: Element> IndexedResults<T> for ReversedIndexed<T> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> T {
        self.inner.get(self.inner.len() - 1 - index)
    }
}

struct ReverseEnumerator<T> {
    source: Option<BoxedEnumerator<T>>,
    buffer: Vec<(T, OrderKey)>,
    poller: CancellationPoller,
}

impl<T: Element> QueryOperatorEnumerator<T> for ReverseEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if let Some(mut source) = self.source.take() {
            while let Some(item) = source.move_next()? {
                self.poller.tick()?;
                self.buffer.push(item);
            }
        }
        Ok(self.buffer.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::parallel;

    #[test]
    fn reverse_indexible() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2).as_ordered().reverse();
        assert_eq!(OrdinalIndexState::Indexible, q.ordinal_index_state());
        assert_eq!(vec![2, 9, 1, 8, 3, 5], q.to_vec().unwrap());
    }

    #[test]
    fn reverse_streaming() {
        let q = parallel((0..500).collect::<Vec<i32>>(), 3)
            .as_ordered()
            .filter(|v| v % 5 == 0)
            .reverse();
        let expected: Vec<_> = (0..500).filter(|v| v % 5 == 0).rev().collect();
        assert_eq!(expected, q.to_vec().unwrap());
    }

    #[test]
    fn double_reverse_is_identity() {
        let q = parallel((0..100).collect::<Vec<i32>>(), 4)
            .as_ordered()
            .filter(|v| v % 2 == 0)
            .reverse()
            .reverse();
        let expected: Vec<_> = (0..100).filter(|v| v % 2 == 0).collect();
        assert_eq!(expected, q.to_vec().unwrap());
    }

    #[test]
    fn take_after_reverse() {
        let q = parallel((0..100).collect::<Vec<i32>>(), 4)
            .as_ordered()
            .filter(|v| v % 2 == 0)
            .reverse()
            .take(3);
        assert_eq!(vec![98, 96, 94], q.to_vec().unwrap());
    }
}
