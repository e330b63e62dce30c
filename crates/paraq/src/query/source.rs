//! Leaf operators producing the elements of a query.

use std::fmt;
use std::sync::Arc;

use paraq_error::Result;

use super::{IndexedQueryResults, IndexedResults, QueryOperator, QueryResults, SequentialIter};
use crate::Element;
use crate::explain::ExplainEntry;
use crate::ordinal::OrdinalIndexState;
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::PartitionedStream;
use crate::stream::partition::partition_chunked;

/// Materialized list of values.
#[derive(Debug, Clone)]
pub struct ListSource<T> {
    values: Arc<Vec<T>>,
}

impl<T> ListSource<T> {
    pub fn new(values: Vec<T>) -> Self {
        ListSource {
            values: Arc::new(values),
        }
    }
}

impl<T: Element> IndexedResults<T> for ListSource<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn get(&self, index: usize) -> T {
        self.values[index].clone()
    }
}

/// Consecutive integers starting at `start`.
#[derive(Debug, Clone, Copy)]
pub struct RangeSource {
    start: i64,
    count: usize,
}

impl RangeSource {
    pub fn new(start: i64, count: usize) -> Self {
        RangeSource { start, count }
    }
}

impl IndexedResults<i64> for RangeSource {
    fn len(&self) -> usize {
        self.count
    }

    fn get(&self, index: usize) -> i64 {
        self.start.wrapping_add(index as i64)
    }
}

/// The same value repeated `count` times.
#[derive(Debug, Clone)]
pub struct RepeatSource<T> {
    value: T,
    count: usize,
}

impl<T> RepeatSource<T> {
    pub fn new(value: T, count: usize) -> Self {
        RepeatSource { value, count }
    }
}

impl<T: Element> IndexedResults<T> for RepeatSource<T> {
    fn len(&self) -> usize {
        self.count
    }

    fn get(&self, _index: usize) -> T {
        self.value.clone()
    }
}

/// Source operator for anything supporting random access.
pub struct IndexedSourceOperator<T> {
    name: &'static str,
    source: Arc<dyn IndexedResults<T>>,
}

impl<T> fmt::Debug for IndexedSourceOperator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedSourceOperator")
            .field("name", &self.name)
            .field("len", &self.source.len())
            .finish()
    }
}

impl<T: Element> IndexedSourceOperator<T> {
    pub fn new(name: &'static str, source: Arc<dyn IndexedResults<T>>) -> Self {
        IndexedSourceOperator { name, source }
    }
}

impl<T: Element> QueryOperator<T> for IndexedSourceOperator<T> {
    fn open(self: Arc<Self>, _cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        Ok(Arc::new(IndexedQueryResults::new(self.source.clone())))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Indexible
    }

    fn output_ordered(&self) -> bool {
        false
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let source = self.source.clone();
        let values = (0..source.len()).map(move |idx| source.get(idx));
        Ok(Box::new(CancellableIter::new(values, cx)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new(self.name).with_value("len", self.source.len())
    }
}

/// Source operator for a cloneable iterable without random access.
///
/// The iterable is cloned for every execution, so each execution sees every
/// element.
pub struct IterableSourceOperator<I> {
    source: I,
}

impl<I> IterableSourceOperator<I> {
    pub fn new(source: I) -> Self {
        IterableSourceOperator { source }
    }
}

impl<I> QueryOperator<I::Item> for IterableSourceOperator<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    fn open(self: Arc<Self>, _cx: &QueryContext) -> Result<Arc<dyn QueryResults<I::Item>>> {
        Ok(Arc::new(IterableResults {
            source: self.source.clone(),
        }))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Correct
    }

    fn output_ordered(&self) -> bool {
        false
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<I::Item>> {
        Ok(Box::new(CancellableIter::new(self.source.clone().into_iter(), cx)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("IterableSource")
    }
}

/// Sequential source output that ends with a canceled error once the query
/// is canceled.
///
/// Checked for every element pulled, including input an operator skips or
/// buffers without yielding.
struct CancellableIter<I> {
    inner: I,
    poller: CancellationPoller,
    canceled: bool,
}

impl<I> CancellableIter<I> {
    fn new(inner: I, cx: &QueryContext) -> Self {
        CancellableIter {
            inner,
            poller: cx.cancellation().poller(),
            canceled: false,
        }
    }
}

impl<I: Iterator> Iterator for CancellableIter<I> {
    type Item = Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.canceled {
            return None;
        }
        if let Err(e) = self.poller.tick() {
            self.canceled = true;
            return Some(Err(e));
        }
        self.inner.next().map(Ok)
    }
}

struct IterableResults<I> {
    source: I,
}

impl<I> QueryResults<I::Item> for IterableResults<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Element,
{
    fn give_partitioned_stream(
        self: Arc<Self>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<I::Item>> {
        partition_chunked(self.source.clone().into_iter(), cx)
    }
}
