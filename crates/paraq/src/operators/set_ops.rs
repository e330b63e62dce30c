use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use paraq_error::{DbError, Result};

use crate::Element;
use crate::exchange::hash_repartition::hash_repartition;
use crate::exchange::{HashMap, HashSet, hash_value, new_hash_map, new_hash_set};
use crate::explain::ExplainEntry;
use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;
use crate::query::{BinaryOperator, BinaryQueryResults, QueryOperator, QueryResults, SequentialIter};
use crate::runtime::cancel::CancellationPoller;
use crate::runtime::context::QueryContext;
use crate::stream::{BoxedEnumerator, PartitionedStream, QueryOperatorEnumerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    /// Distinct elements from either side.
    Union,
    /// Distinct left elements also on the right.
    Intersect,
    /// Distinct left elements not on the right.
    Except,
}

impl SetOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "Union",
            Self::Intersect => "Intersect",
            Self::Except => "Except",
        }
    }
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set operations over two inputs.
///
/// Both inputs are hash repartitioned so equal elements from either side end
/// up in the same partition. Output never contains duplicates.
pub struct SetOperator<T: Element> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
    operation: SetOperation,
}

impl<T> SetOperator<T>
where
    T: Element + Hash + Eq,
{
    pub fn new(
        left: Arc<dyn QueryOperator<T>>,
        right: Arc<dyn QueryOperator<T>>,
        operation: SetOperation,
    ) -> Self {
        SetOperator {
            left,
            right,
            operation,
        }
    }
}

impl<T> QueryOperator<T> for SetOperator<T>
where
    T: Element + Hash + Eq,
{
    fn open(self: Arc<Self>, cx: &QueryContext) -> Result<Arc<dyn QueryResults<T>>> {
        let left = self.left.clone().open(cx)?;
        let right = self.right.clone().open(cx)?;
        Ok(Arc::new(BinaryQueryResults::new(left, right, self, false, false)))
    }

    fn ordinal_index_state(&self) -> OrdinalIndexState {
        OrdinalIndexState::Shuffled
    }

    fn output_ordered(&self) -> bool {
        match self.operation {
            SetOperation::Union => self.left.output_ordered() || self.right.output_ordered(),
            SetOperation::Intersect | SetOperation::Except => self.left.output_ordered(),
        }
    }

    fn limits_parallelism(&self) -> bool {
        self.left.limits_parallelism() || self.right.limits_parallelism()
    }

    fn uses_barriers(&self) -> bool {
        false
    }

    fn as_sequential(&self, cx: &QueryContext) -> Result<SequentialIter<T>> {
        let mut out = Vec::new();
        let mut seen: HashSet<T> = new_hash_set();

        match self.operation {
            SetOperation::Union => {
                for item in self.left.as_sequential(cx)?.chain(self.right.as_sequential(cx)?) {
                    let element = item?;
                    if seen.insert(element.clone()) {
                        out.push(element);
                    }
                }
            }
            SetOperation::Intersect => {
                for item in self.right.as_sequential(cx)? {
                    seen.insert(item?);
                }
                for item in self.left.as_sequential(cx)? {
                    let element = item?;
                    if seen.remove(&element) {
                        out.push(element);
                    }
                }
            }
            SetOperation::Except => {
                for item in self.right.as_sequential(cx)? {
                    seen.insert(item?);
                }
                for item in self.left.as_sequential(cx)? {
                    let element = item?;
                    if seen.insert(element.clone()) {
                        out.push(element);
                    }
                }
            }
        }

        Ok(Box::new(out.into_iter().map(Ok)))
    }

    fn explain_entry(&self) -> ExplainEntry {
        ExplainEntry::new(self.operation.as_str())
            .with_child(self.left.explain_entry())
            .with_child(self.right.explain_entry())
    }
}

impl<T> BinaryOperator<T, T> for SetOperator<T>
where
    T: Element + Hash + Eq,
{
    fn wrap_partitioned_streams(
        &self,
        left: PartitionedStream<T>,
        right: PartitionedStream<T>,
        cx: &QueryContext,
    ) -> Result<PartitionedStream<T>> {
        if left.partition_count() != right.partition_count() {
            return Err(DbError::internal("Set operation inputs have different partition counts")
                .with_field("left", left.partition_count())
                .with_field("right", right.partition_count()));
        }

        let preserve_order = self.output_ordered();
        let left = hash_repartition(left, |v| hash_value(v), preserve_order, cx)?;
        let right = hash_repartition(right, |v| hash_value(v), preserve_order, cx)?;

        let (left_parts, left_comparer, _) = left.into_parts();
        let (right_parts, right_comparer, _) = right.into_parts();

        let comparer = match self.operation {
            SetOperation::Union if preserve_order => {
                KeyComparer::concat(left_comparer, right_comparer)
            }
            _ => left_comparer,
        };

        let partitions = left_parts
            .into_iter()
            .zip(right_parts)
            .map(|(left, right)| {
                Box::new(SetOperationEnumerator {
                    operation: self.operation,
                    left,
                    right: Some(right),
                    right_done: false,
                    seen: new_hash_set(),
                    ordered: preserve_order.then(|| comparer.clone()),
                    output: None,
                    poller: cx.cancellation().poller(),
                }) as BoxedEnumerator<T>
            })
            .collect();

        PartitionedStream::try_new(partitions, comparer, OrdinalIndexState::Shuffled)
    }
}

struct SetOperationEnumerator<T> {
    operation: SetOperation,
    left: BoxedEnumerator<T>,
    /// Taken once consumed. Union streams it after the left side, the other
    /// operations consume it up front.
    right: Option<BoxedEnumerator<T>>,
    right_done: bool,
    /// Union: elements already yielded. Intersect: right elements not yet
    /// matched. Except: right elements and elements already yielded.
    seen: HashSet<T>,
    /// Set when the query is ordered.
    ordered: Option<KeyComparer>,
    /// Materialized output for ordered queries.
    output: Option<std::vec::IntoIter<(T, OrderKey)>>,
    poller: CancellationPoller,
}

impl<T> SetOperationEnumerator<T>
where
    T: Element + Hash + Eq,
{
    fn consume_right(&mut self) -> Result<()> {
        if self.right_done {
            return Ok(());
        }
        if let Some(mut right) = self.right.take() {
            while let Some((element, _)) = right.move_next()? {
                self.poller.tick()?;
                self.seen.insert(element);
            }
        }
        self.right_done = true;
        Ok(())
    }

    /// Keep the lowest keyed occurrence of each accepted element.
    fn materialize(&mut self, comparer: &KeyComparer) -> Result<Vec<(T, OrderKey)>> {
        let mut lowest: HashMap<T, OrderKey> = new_hash_map();

        if self.operation != SetOperation::Union {
            self.consume_right()?;
        }

        let union = self.operation == SetOperation::Union;
        while let Some((element, key)) = self.left.move_next()? {
            self.poller.tick()?;
            let accept = match self.operation {
                SetOperation::Union => true,
                SetOperation::Intersect => self.seen.contains(&element),
                SetOperation::Except => !self.seen.contains(&element),
            };
            if accept {
                let key = if union { OrderKey::Left(Box::new(key)) } else { key };
                offer_lowest(&mut lowest, element, key, comparer);
            }
        }

        // Only still present for union.
        if let Some(mut right) = self.right.take() {
            while let Some((element, key)) = right.move_next()? {
                self.poller.tick()?;
                offer_lowest(&mut lowest, element, OrderKey::Right(Box::new(key)), comparer);
            }
        }

        Ok(lowest.into_iter().collect())
    }
}

fn offer_lowest<T: Hash + Eq>(
    lowest: &mut HashMap<T, OrderKey>,
    element: T,
    key: OrderKey,
    comparer: &KeyComparer,
) {
    match lowest.get_mut(&element) {
        Some(existing) => {
            if comparer.compare(&key, existing).is_lt() {
                *existing = key;
            }
        }
        None => {
            lowest.insert(element, key);
        }
    }
}

impl<T> QueryOperatorEnumerator<T> for SetOperationEnumerator<T>
where
    T: Element + Hash + Eq,
{
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        if let Some(comparer) = self.ordered.take() {
            let output = self.materialize(&comparer)?;
            self.output = Some(output.into_iter());
        }
        if let Some(output) = self.output.as_mut() {
            return Ok(output.next());
        }

        match self.operation {
            SetOperation::Union => {
                while let Some((element, key)) = self.left.move_next()? {
                    self.poller.tick()?;
                    if self.seen.insert(element.clone()) {
                        return Ok(Some((element, key)));
                    }
                }
                if let Some(right) = self.right.as_mut() {
                    while let Some((element, key)) = right.move_next()? {
                        self.poller.tick()?;
                        if self.seen.insert(element.clone()) {
                            return Ok(Some((element, key)));
                        }
                    }
                    self.right = None;
                }
                Ok(None)
            }
            SetOperation::Intersect => {
                self.consume_right()?;
                while let Some((element, key)) = self.left.move_next()? {
                    self.poller.tick()?;
                    if self.seen.remove(&element) {
                        return Ok(Some((element, key)));
                    }
                }
                Ok(None)
            }
            SetOperation::Except => {
                self.consume_right()?;
                while let Some((element, key)) = self.left.move_next()? {
                    self.poller.tick()?;
                    if self.seen.insert(element.clone()) {
                        return Ok(Some((element, key)));
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::testutil::{parallel, sorted};

    #[test]
    fn union_ordered() {
        let left = parallel(vec![1, 3, 3, 5], 2).as_ordered();
        let right = parallel(vec![4, 3, 2, 1], 2).as_ordered();
        assert_eq!(vec![1, 3, 5, 4, 2], left.union(&right).to_vec().unwrap());
    }

    #[test]
    fn intersect_ordered() {
        let left = parallel(vec![5, 1, 4, 1, 2, 4], 3).as_ordered();
        let right = parallel(vec![4, 1, 9], 3);
        assert_eq!(vec![1, 4], left.intersect(&right).to_vec().unwrap());
    }

    #[test]
    fn except_ordered() {
        let left = parallel(vec![5, 1, 4, 1, 2, 5, 7], 2).as_ordered();
        let right = parallel(vec![4, 9], 2);
        assert_eq!(vec![5, 1, 2, 7], left.except(&right).to_vec().unwrap());
    }

    #[test]
    fn set_ops_unordered_match_sequential() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let a: Vec<u8> = (0..1000).map(|_| rng.random_range(0..60)).collect();
        let b: Vec<u8> = (0..800).map(|_| rng.random_range(30..90)).collect();

        let mut union: Vec<u8> = a.iter().chain(&b).copied().collect();
        union.sort();
        union.dedup();
        let mut intersect: Vec<u8> = a.iter().copied().filter(|v| b.contains(v)).collect();
        intersect.sort();
        intersect.dedup();
        let mut except: Vec<u8> = a.iter().copied().filter(|v| !b.contains(v)).collect();
        except.sort();
        except.dedup();

        let left = parallel(a, 4);
        let right = parallel(b, 4);
        assert_eq!(union, sorted(left.union(&right).to_vec().unwrap()));
        assert_eq!(intersect, sorted(left.intersect(&right).to_vec().unwrap()));
        assert_eq!(except, sorted(left.except(&right).to_vec().unwrap()));
    }
}
