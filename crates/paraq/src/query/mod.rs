//! Operator tree and the results produced by opening it.
//!
//! Building a query produces a tree of [`QueryOperator`]s. Nothing runs until
//! the tree is executed: the driver opens the root (opening children
//! recursively) to get [`QueryResults`], then asks those results for a
//! partitioned stream sized to the execution's degree of parallelism.

pub mod driver;
pub mod source;

use std::marker::PhantomData;
use std::sync::Arc;

use paraq_error::{OptionExt, Result};

use crate::Element;
use crate::explain::ExplainEntry;
use crate::ordinal::OrdinalIndexState;
use crate::runtime::context::QueryContext;
use crate::stream::PartitionedStream;
use crate::stream::merge::premature_merge;
use crate::stream::partition::partition_indexed;

/// Sequential form of an operator, used when a query runs on the calling
/// thread.
pub type SequentialIter<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

/// A node in the operator tree.
pub trait QueryOperator<T: Element>: Send + Sync {
    /// Open this operator and all of its children for a single execution.
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>>;

    /// What's known about the keys produced by this operator.
    fn ordinal_index_state(&self) -> OrdinalIndexState;

    /// If the final output should be merged in key order.
    fn output_ordered(&self) -> bool;

    /// If this operator or any child would need to buffer or re-index its
    /// input to run in parallel.
    fn limits_parallelism(&self) -> bool {
        false
    }

    /// If partitions produced by this operator may block waiting on peer
    /// partitions while being enumerated.
    fn uses_barriers(&self) -> bool;

    /// Produce the output of this operator without partitioning.
    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>>;

    fn explain_entry(&self) -> ExplainEntry;
}

/// Results of an opened operator.
pub trait QueryResults<T: Element>: Send + Sync {
    /// Produce partitioned streams for the results.
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<T>>;

    /// If results can be accessed by index.
    fn is_indexible(&self) -> bool {
        false
    }

    /// Get random access to the results. Only returns something when
    /// `is_indexible` returns true.
    fn into_indexed(self: Arc<Self>) -> Option<Arc<dyn IndexedResults<T>>> {
        None
    }
}

/// Results with a known length supporting access by index.
pub trait IndexedResults<T>: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the element at `index`. Index must be less than `len`.
    fn get(&self, index: usize) -> T;
}

/// Query results backed by random access results.
pub struct IndexedQueryResults<T> {
    inner: Arc<dyn IndexedResults<T>>,
}

impl<T> IndexedQueryResults<T> {
    pub fn new(inner: Arc<dyn IndexedResults<T>>) -> Self {
        IndexedQueryResults { inner }
    }
}

impl<T: Element> QueryResults<T> for IndexedQueryResults<T> {
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<T>> {
        partition_indexed(self.inner.clone(), cx)
    }

    fn is_indexible(&self) -> bool {
        true
    }

    fn into_indexed(self: Arc<Self>) -> Option<Arc<dyn IndexedResults<T>>> {
        Some(self.inner.clone())
    }
}

/// Get random access to opened results if the results support it.
pub fn try_indexed<T: Element>(
    results: &Arc<dyn QueryResults<T>>,
) -> Result<Option<Arc<dyn IndexedResults<T>>>> {
    if !results.is_indexible() {
        return Ok(None);
    }
    let indexed = results
        .clone()
        .into_indexed()
        .required("indexed results for indexible query results")?;
    Ok(Some(indexed))
}

/// Per partition behavior of an operator with a single input.
pub trait UnaryOperator<TIn: Element, TOut: Element>: Send + Sync + 'static {
    /// Wrap the input partitions with this operator's enumerators.
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<TIn>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<TOut>>;
}

/// Results for a unary operator, wrapping the child's partitions when
/// streamed.
pub struct UnaryQueryResults<TIn: Element, TOut, O> {
    child: Arc<dyn QueryResults<TIn>>,
    op: Arc<O>,
    /// Fully merge and re-index the child's output before wrapping it.
    premature_merge: bool,
    _out: PhantomData<fn() -> TOut>,
}

impl<TIn, TOut, O> UnaryQueryResults<TIn, TOut, O>
where
    TIn: Element,
    TOut: Element,
    O: UnaryOperator<TIn, TOut>,
{
    pub fn new(child: Arc<dyn QueryResults<TIn>>, op: Arc<O>, premature_merge: bool) -> Self {
        UnaryQueryResults {
            child,
            op,
            premature_merge,
            _out: PhantomData,
        }
    }

    /// Open `child` and wrap its results.
    pub fn open(
        child: &Arc<dyn QueryOperator<TIn>>,
        op: Arc<O>,
        premature_merge: bool,
        cx: &QueryContext,
    ) -> Result<Arc<dyn QueryResults<TOut>>> {
        let child = child.clone().open(cx)?;
        Ok(Arc::new(Self::new(child, op, premature_merge)))
    }
}

impl<TIn, TOut, O> QueryResults<TOut> for UnaryQueryResults<TIn, TOut, O>
where
    TIn: Element,
    TOut: Element,
    O: UnaryOperator<TIn, TOut>,
{
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<TOut>> {
        let mut input = self.child.clone().give_partitioned_stream(cx)?;
        if self.premature_merge {
            input = premature_merge(input, cx)?;
        }
        self.op.wrap_partitioned_stream(input, cx)
    }
}

/// Per partition behavior of an operator with two inputs of the same element
/// type.
pub trait BinaryOperator<T: Element, TOut: Element>: Send + Sync + 'static {
    /// Combine the two inputs. Both inputs have the same number of
    /// partitions.
    fn wrap_partitioned_streams(
        &self,
        left: PartitionedStream<T>,
        right: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<TOut>>;
}

pub struct BinaryQueryResults<T: Element, TOut, O> {
    left: Arc<dyn QueryResults<T>>,
    right: Arc<dyn QueryResults<T>>,
    op: Arc<O>,
    left_premature_merge: bool,
    right_premature_merge: bool,
    _out: PhantomData<fn() -> TOut>,
}

impl<T, TOut, O> BinaryQueryResults<T, TOut, O>
where
    T: Element,
    TOut: Element,
    O: BinaryOperator<T, TOut>,
{
    pub fn new(
        left: Arc<dyn QueryResults<T>>,
        right: Arc<dyn QueryResults<T>>,
        op: Arc<O>,
        left_premature_merge: bool,
        right_premature_merge: bool,
    ) -> Self {
        BinaryQueryResults {
            left,
            right,
            op,
            left_premature_merge,
            right_premature_merge,
            _out: PhantomData,
        }
    }
}

impl<T, TOut, O> QueryResults<TOut> for BinaryQueryResults<T, TOut, O>
where
    T: Element,
    TOut: Element,
    O: BinaryOperator<T, TOut>,
{
    fn give_partitioned_stream(self: Arc<Self>, cx: &QueryContext) -> Result<PartitionedStream<TOut>> {
        let mut left = self.left.clone().give_partitioned_stream(cx)?;
        if self.left_premature_merge {
            left = premature_merge(left, cx)?;
        }
        let mut right = self.right.clone().give_partitioned_stream(cx)?;
        if self.right_premature_merge {
            right = premature_merge(right, cx)?;
        }
        self.op.wrap_partitioned_streams(left, right, cx)
    }
}
