use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

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

/// Searches all partitions for an element whose predicate result equals the
/// qualification.
///
/// Any is a search for `true`, All is a search for `false` with the result
/// negated. Every partition yields exactly one bool: whether it found a
/// qualifying element. Partitions stop as soon as any partition finds one.
pub struct QuantifierOperator<T: Element> {
    name: &'static str,
    child: Arc<dyn QueryOperator<T>>,
    predicate: Predicate<T>,
    qualification: bool,
}

impl<T: Element> QuantifierOperator<T> {
    pub fn any(child: Arc<dyn QueryOperator<T>>, predicate: Predicate<T>) -> Self {
        QuantifierOperator {
            name: "Any",
            child,
            predicate,
            qualification: true,
        }
    }

    /// Searches for an element not matching the predicate.
    pub fn all(child: Arc<dyn QueryOperator<T>>, predicate: Predicate<T>) -> Self {
        QuantifierOperator {
            name: "All",
            child,
            predicate,
            qualification: false,
        }
    }

    pub fn contains(child: Arc<dyn QueryOperator<T>>, value: T) -> Self
    where
        T: PartialEq,
    {
        QuantifierOperator {
            name: "Contains",
            child,
            predicate: Arc::new(move |v: &T| *v == value),
            qualification: true,
        }
    }
}

impl<T: Element> QueryOperator<bool> for QuantifierOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<bool>>> {
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

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<bool>> {
        let mut found = false;
        for item in self.child.as_sequential(cx)? {
            if (self.predicate)(&item?) == self.qualification {
                found = true;
                break;
            }
        }
        Ok(Box::new(std::iter::once(Ok(found))))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new(self.name)
            .with_value("qualification", self.qualification)
            .with_child(self.child.explain_entry())
    }
}

impl<T: Element> UnaryOperator<T, bool> for QuantifierOperator<T> {
    fn wrap_partitioned_stream(
        &self,
        input: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<bool>> {
        let found = Arc::new(AtomicBool::new(false));
        Ok(input.wrap_partitions(OrdinalIndexState::Shuffled, |partition, source| {
            Box::new(QuantifierEnumerator {
                source,
                predicate: self.predicate.clone(),
                qualification: self.qualification,
                found: found.clone(),
                partition,
                poller: cx.cancellation().poller(),
                done: false,
            }) as BoxedEnumerator<bool>
        }))
    }
}

struct QuantifierEnumerator<T> {
    source: BoxedEnumerator<T>,
    predicate: Predicate<T>,
    qualification: bool,
    /// Set by whichever partition finds a qualifying element first.
    found: Arc<AtomicBool>,
    partition: usize,
    poller: CancellationPoller,
    done: bool,
}

impl<T: Element> QueryOperatorEnumerator<bool> for QuantifierEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(bool, OrderKey)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let key = OrderKey::Index(self.partition);
        while !self.found.load(Ordering::Relaxed) {
            let Some((element, _)) = self.source.move_next()? else {
                break;
            };
            self.poller.tick()?;
            if (self.predicate)(&element) == self.qualification {
                self.found.store(true, Ordering::Relaxed);
                return Ok(Some((true, key)));
            }
        }

        Ok(Some((false, key)))
    }
}
