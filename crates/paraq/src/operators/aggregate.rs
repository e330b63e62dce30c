use std::sync::Arc;

use paraq_error::Result;
use tracing::trace;

use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

pub type FoldFn<A, T> = Arc<dyn Fn(A, T) -> A + Send + Sync>;

/// Folds each partition's input into a single partial result.
///
/// Yields exactly one partial per partition. Combining partials is left to
/// the caller, which sees them in partition order.
pub struct AggregateOperator<T: Element, A> {
    name: &'static str,
    child: Arc<dyn QueryOperator<T>>,
    seed: A,
    fold: FoldFn<A, T>,
}

impl<T: Element, A: Element> AggregateOperator<T, A> {
    pub fn new(name: &'static str, child: Arc<dyn QueryOperator<T>>, seed: A, fold: FoldFn<A, T>) -> Self {
        AggregateOperator {
            name,
            child,
            seed,
            fold,
        }
    }
}

impl<T: Element, A: Element> QueryOperator<A> for AggregateOperator<T, A> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<A>>> {
        let child = self.child.clone();
        UnaryQueryResults::open(&child, self, false, cx)
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Shuffled
    }

    fn output_ordered(&self) -> bool {
        false
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<A>> {
        let mut acc = self.seed.clone();
        for item in self.child.as_sequential(cx)? {
            acc = (self.fold)(acc, item?);
        }
        Ok(Box::new(std::iter::once(Ok(acc))))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new(self.name).with_child(self.child.explain_entry())
    }
}

impl<T: Element, A: Element> UnaryOperator<T, A> for AggregateOperator<T, A> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<A>> {
        let wrapped = input.wrap_partitions(OrdinalIndexState::Shuffled, |partition, source| {
            Box::new(AggregateEnumerator {
                source: Some(source),
                partition,
                seed: self.seed.clone(),
                fold: self.fold.clone(),
                poller: cx.cancellation().poller(),
            }) as BoxedEnumerator<A>
        });
        Ok(wrapped.with_comparer(KeyComparer::Natural))
    }
}

struct AggregateEnumerator<T, A> {
    /// Taken once folded.
    source: Option<BoxedEnumerator<T>>,
    partition: usize,
    seed: A,
    fold: FoldFn<A, T>,
    poller: CancellationPoller,
}

impl<T: Element, A: Element> QueryOperatorEnumerator<A> for AggregateEnumerator<T, A> {
    fn move_next(&mut self) -> Result<Option<(A, OrderKey)>> {
        let Some(mut source) = self.source.take() else {
            return Ok(None);
        };

        let mut acc = self.seed.clone();
        let mut count = 0;
        while let Some((element, _)) = source.move_next()? {
            self.poller.tick()?;
            acc = (self.fold)(acc, element);
            count += 1;
        }
        trace!(partition = self.partition, count, "folded partition");

        Ok(Some((acc, OrderKey::Index(self.partition))))
    }
}
