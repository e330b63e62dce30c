use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use paraq_error::Result;

use super::Predicate;
use crate::Element;
use crate::explain::ExplainEntry;
use crate::key::OrderKey;
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter, UnaryOperator, UnaryQueryResults};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

/// Finds the elements matching an optional predicate, stopping once more
/// than one match has been seen across all partitions.
///
/// Yields zero, one, or two elements in total. The caller decides what a
/// count other than one means.
pub struct SingleOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    predicate: Option<Predicate<T>>,
}

impl<T: Element> SingleOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, predicate: Option<Predicate<T>>) -> Self {
        SingleOperator { child, predicate }
    }
}

impl<T: Element> QueryOperator<T> for SingleOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
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

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let mut found = Vec::with_capacity(2);
        for item in self.child.as_sequential(cx)? {
            let element = item?;
            if self.predicate.as_ref().is_none_or(|p| p(&element)) {
                found.push(element);
                if found.len() == 2 {
                    break;
                }
            }
        }
        Ok(Box::new(found.into_iter().map(Ok)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new("Single")
            .with_value("predicate", self.predicate.is_some())
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, T> for SingleOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        let matches = Arc::new(AtomicUsize::new(0));
        Ok(input.wrap_partitions(OrdinalIndexState::Shuffled, |_, source| {
            Box::new(SingleEnumerator {
                source,
                predicate: self.predicate.clone(),
                matches: matches.clone(),
                poller: cx.cancellation().poller(),
                found: None,
            }) as BoxedEnumerator<T>
        }))
    }
}

struct SingleEnumerator<T> {
    source: BoxedEnumerator<T>,
    predicate: Option<Predicate<T>>,
    /// Total matches seen by all partitions.
    matches: Arc<AtomicUsize>,
    poller: CancellationPoller,
    found: Option<std::vec::IntoIter<(T, OrderKey)>>,
}

impl<T: Element> SingleEnumerator<T> {
    fn search(&mut self) -> Result<Vec<(T, OrderKey)>> {
        let mut found = Vec::with_capacity(2);
        while self.matches.load(Ordering::Acquire) < 2 {
            let Some((element, key)) = self.source.move_next()? else {
                break;
            };
            self.poller.tick()?;
            if self.predicate.as_ref().is_none_or(|p| p(&element)) {
                self.matches.fetch_add(1, Ordering::AcqRel);
                found.push((element, key));
                if found.len() == 2 {
                    // Second match yielded as well so the caller can detect
                    // the ambiguity.
                    break;
                }
            }
        }
        Ok(found)
    }
}

impl<T: Element> QueryOperatorEnumerator<T> for SingleEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if self.found.is_none() {
            let found = self.search()?;
            self.found = Some(found.into_iter());
        }
        Ok(self.found.as_mut().and_then(|found| found.next()))
    }
}
