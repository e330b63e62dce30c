use std::sync::Arc;

use paraq_error::Result;

use crate::Element;
use crate::explain::ExplainEntry;
use crate::ordinal::OrdinalIndexState;
use crate::query::{QueryOperator, QueryResults, SequentialIter};
use crate::runtime::context::QueryContext;

/// Marks whether the query's output should be merged in key order.
///
/// Doesn't change the data, opening this opens the child directly.
pub struct SetOrderingOperator<T: Element> {
    child: Arc<dyn QueryOperator<T>>,
    ordered: bool,
}

impl<T: Element> SetOrderingOperator<T> {
    pub fn new(child: Arc<dyn QueryOperator<T>>, ordered: bool) -> Self {
        SetOrderingOperator { child, ordered }
    }
}

impl<T: Element> QueryOperator<T> for SetOrderingOperator<T> {
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        self.child.clone().open(cx)
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        self.child.ordinal_index_state()
    }

    fn output_ordered(&self) -> bool {
        self.ordered
    }

    fn limits_parallelism(&self) -> bool {
        self.child.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        self.child.uses_barriers()
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        self.child.as_sequential(cx)
    }

    fn explain_entry(&self) -> ExplainEntry {
        let name = if self.ordered { "AsOrdered" } else { "AsUnordered" };
        ExplainEntry::new(name).with_child(self.child.explain_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn ordered_then_unordered() {
        let q = parallel((0..200).collect::<Vec<i32>>(), 4).as_ordered();
        assert_eq!((0..200).collect::<Vec<_>>(), q.filter(|_| true).to_vec().unwrap());

        let unordered = q.as_unordered().filter(|_| true);
        assert_eq!((0..200).collect::<Vec<_>>(), sorted(unordered.to_vec().unwrap()));
        assert!(unordered.explain().contains("AsUnordered"));
    }
}
