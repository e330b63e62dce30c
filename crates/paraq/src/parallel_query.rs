//! Public query builder.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::ops::{Add, Deref};
use std::sync::Arc;

use paraq_error::{DbError, ErrorKind, Result};

use crate::Element;
use crate::config::settings::{DegreeOfParallelism, ExecutionMode, QuerySettings};
use crate::operators::aggregate::AggregateOperator;
use crate::operators::concat::ConcatOperator;
use crate::operators::default_if_empty::DefaultIfEmptyOperator;
use crate::operators::distinct::DistinctOperator;
use crate::operators::filter::FilterOperator;
use crate::operators::first_last::{FirstLastOperator, SearchDirection};
use crate::operators::group_by::{GroupByOperator, Grouping};
use crate::operators::map::{MapOperator, Selector};
use crate::operators::ordering::SetOrderingOperator;
use crate::operators::quantifier::QuantifierOperator;
use crate::operators::reverse::ReverseOperator;
use crate::operators::set_ops::{SetOperation, SetOperator};
use crate::operators::single::SingleOperator;
use crate::operators::sort::{KeyCompareFn, SortOperator, reverse_compare, then_compare};
use crate::operators::take_skip::{TakeOrSkip, TakeSkipOperator};
use crate::operators::take_skip_while::TakeSkipWhileOperator;
use crate::operators::{ElementPredicate, KeySelector, Predicate};
use crate::ordinal::OrdinalIndexState;
use crate::query::QueryOperator;
use crate::query::driver;
use crate::query::source::{IndexedSourceOperator, IterableSourceOperator, ListSource, RangeSource, RepeatSource};
use crate::runtime::cancel::CancellationToken;
use crate::runtime::scheduler::catch_user_panic;

/// A query over a sequence of `T`, executed in parallel.
///
/// Building a query never runs anything. Terminal methods (`to_vec`, `count`,
/// `first`, ...) execute the query from scratch every time they're called.
///
/// Queries are unordered by default: the output contains the right elements
/// in no particular order. Call [`as_ordered`](Self::as_ordered) or sort to
/// get output in sequential order.
pub struct ParallelQuery<T: Element> {
    root: Arc<dyn QueryOperator<T>>,
    settings: QuerySettings,
}

impl<T: Element> Clone for ParallelQuery<T> {
    fn clone(&self) -> Self {
        ParallelQuery {
            root: self.root.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T: Element> fmt::Debug for ParallelQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelQuery")
            .field("root", &self.root.explain_entry().name)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<T: Element> ParallelQuery<T> {
    fn from_operator(root: Arc<dyn QueryOperator<T>>) -> Self {
        ParallelQuery {
            root,
            settings: QuerySettings::default(),
        }
    }

    /// New query with the same settings over a different operator tree.
    fn with_root<U: Element>(&self, root: Arc<dyn QueryOperator<U>>) -> ParallelQuery<U> {
        ParallelQuery {
            root,
            settings: self.settings.clone(),
        }
    }

    /// Settings for a binary operator. Settings on `self` win.
    fn with_binary_root<U: Element>(
        &self,
        other: &ParallelQuery<T>,
        root: Arc<dyn QueryOperator<U>>,
    ) -> ParallelQuery<U> {
        ParallelQuery {
            root,
            settings: self.settings.merge(&other.settings),
        }
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        Self::from_operator(Arc::new(IndexedSourceOperator::new(
            "ListSource",
            Arc::new(ListSource::new(values)),
        )))
    }

    /// Query over anything that can be iterated more than once.
    ///
    /// The source has no random access, so partitions pull chunks of elements
    /// from a shared iterator.
    pub fn from_iterable<I>(source: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_operator(Arc::new(IterableSourceOperator::new(source)))
    }

    pub fn repeat(value: T, count: usize) -> Self {
        Self::from_operator(Arc::new(IndexedSourceOperator::new(
            "RepeatSource",
            Arc::new(RepeatSource::new(value, count)),
        )))
    }

    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Replace all settings for this query.
    pub fn with_settings(&self, settings: QuerySettings) -> Self {
        ParallelQuery {
            root: self.root.clone(),
            settings,
        }
    }

    pub fn with_degree_of_parallelism(&self, dop: usize) -> Result<Self> {
        DegreeOfParallelism::validate(dop)?;
        Ok(self.with_settings(self.settings.clone().with_degree_of_parallelism(Some(dop))))
    }

    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        self.with_settings(self.settings.clone().with_cancellation(token))
    }

    pub fn with_execution_mode(&self, execution_mode: ExecutionMode) -> Self {
        self.with_settings(self.settings.clone().with_execution_mode(execution_mode))
    }

    pub fn with_striping(&self, prefer_striping: bool) -> Self {
        self.with_settings(self.settings.clone().with_striping(prefer_striping))
    }

    /// Run this query on the calling thread.
    pub fn as_sequential(&self) -> Self {
        self.with_execution_mode(ExecutionMode::ForceSequential)
    }

    /// Produce output in sequential order.
    pub fn as_ordered(&self) -> Self {
        self.with_root(Arc::new(SetOrderingOperator::new(self.root.clone(), true)))
    }

    /// Produce output in any order.
    pub fn as_unordered(&self) -> Self {
        self.with_root(Arc::new(SetOrderingOperator::new(self.root.clone(), false)))
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = ElementPredicate::Plain(Arc::new(predicate));
        self.with_root(Arc::new(FilterOperator::new(self.root.clone(), predicate)))
    }

    /// Filter with a predicate that also receives the element's position.
    pub fn filter_indexed<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T, usize) -> bool + Send + Sync + 'static,
    {
        let predicate = ElementPredicate::Indexed(Arc::new(predicate));
        self.with_root(Arc::new(FilterOperator::new(self.root.clone(), predicate)))
    }

    pub fn map<U, F>(&self, selector: F) -> ParallelQuery<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let selector = Selector::Plain(Arc::new(selector));
        self.with_root(Arc::new(MapOperator::new(self.root.clone(), selector)))
    }

    pub fn map_indexed<U, F>(&self, selector: F) -> ParallelQuery<U>
    where
        U: Element,
        F: Fn(T, usize) -> U + Send + Sync + 'static,
    {
        let selector = Selector::Indexed(Arc::new(selector));
        self.with_root(Arc::new(MapOperator::new(self.root.clone(), selector)))
    }

    pub fn order_by<K, F>(&self, key: F) -> OrderedParallelQuery<T, K>
    where
        K: Ord + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        OrderedParallelQuery::new(self, Arc::new(key), natural_compare())
    }

    pub fn order_by_descending<K, F>(&self, key: F) -> OrderedParallelQuery<T, K>
    where
        K: Ord + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        OrderedParallelQuery::new(self, Arc::new(key), reverse_compare(natural_compare()))
    }

    pub fn order_by_with<K, F, C>(&self, key: F, compare: C) -> OrderedParallelQuery<T, K>
    where
        K: Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
        C: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        OrderedParallelQuery::new(self, Arc::new(key), Arc::new(compare))
    }

    pub fn group_by<K, F>(&self, key: F) -> ParallelQuery<Grouping<K, T>>
    where
        K: Element + Hash + Eq,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.group_by_with_element(key, |v| v)
    }

    /// Group by key, projecting each element before adding it to its group.
    pub fn group_by_with_element<K, E, F, G>(&self, key: F, element: G) -> ParallelQuery<Grouping<K, E>>
    where
        K: Element + Hash + Eq,
        E: Element,
        F: Fn(&T) -> K + Send + Sync + 'static,
        G: Fn(T) -> E + Send + Sync + 'static,
    {
        self.with_root(Arc::new(GroupByOperator::new(
            self.root.clone(),
            Arc::new(key),
            Arc::new(element),
        )))
    }

    pub fn distinct(&self) -> Self
    where
        T: Hash + Eq,
    {
        self.distinct_by(|v| v.clone())
    }

    /// Keep one element per distinct key.
    pub fn distinct_by<K, F>(&self, key: F) -> Self
    where
        K: Element + Hash + Eq,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let key: KeySelector<T, K> = Arc::new(key);
        self.with_root(Arc::new(DistinctOperator::new(self.root.clone(), key)))
    }

    pub fn union(&self, other: &ParallelQuery<T>) -> Self
    where
        T: Hash + Eq,
    {
        self.set_operation(other, SetOperation::Union)
    }

    pub fn intersect(&self, other: &ParallelQuery<T>) -> Self
    where
        T: Hash + Eq,
    {
        self.set_operation(other, SetOperation::Intersect)
    }

    pub fn except(&self, other: &ParallelQuery<T>) -> Self
    where
        T: Hash + Eq,
    {
        self.set_operation(other, SetOperation::Except)
    }

    fn set_operation(&self, other: &ParallelQuery<T>, operation: SetOperation) -> Self
    where
        T: Hash + Eq,
    {
        let op = SetOperator::new(self.root.clone(), other.root.clone(), operation);
        self.with_binary_root(other, Arc::new(op))
    }

    pub fn take(&self, count: usize) -> Self {
        self.with_root(Arc::new(TakeSkipOperator::new(self.root.clone(), count, TakeOrSkip::Take)))
    }

    pub fn skip(&self, count: usize) -> Self {
        self.with_root(Arc::new(TakeSkipOperator::new(self.root.clone(), count, TakeOrSkip::Skip)))
    }

    pub fn take_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.take_skip_while(ElementPredicate::Plain(Arc::new(predicate)), TakeOrSkip::Take)
    }

    pub fn take_while_indexed<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T, usize) -> bool + Send + Sync + 'static,
    {
        self.take_skip_while(ElementPredicate::Indexed(Arc::new(predicate)), TakeOrSkip::Take)
    }

    pub fn skip_while<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.take_skip_while(ElementPredicate::Plain(Arc::new(predicate)), TakeOrSkip::Skip)
    }

    pub fn skip_while_indexed<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T, usize) -> bool + Send + Sync + 'static,
    {
        self.take_skip_while(ElementPredicate::Indexed(Arc::new(predicate)), TakeOrSkip::Skip)
    }

    fn take_skip_while(&self, predicate: ElementPredicate<T>, kind: TakeOrSkip) -> Self {
        self.with_root(Arc::new(TakeSkipWhileOperator::new(self.root.clone(), predicate, kind)))
    }

    pub fn reverse(&self) -> Self {
        self.with_root(Arc::new(ReverseOperator::new(self.root.clone())))
    }

    /// Everything in this query followed by everything in `other`.
    pub fn concat(&self, other: &ParallelQuery<T>) -> Self {
        let op = ConcatOperator::new(self.root.clone(), other.root.clone());
        self.with_binary_root(other, Arc::new(op))
    }

    /// Yield `value` if this query produces nothing.
    pub fn default_if_empty(&self, value: T) -> Self {
        self.with_root(Arc::new(DefaultIfEmptyOperator::new(self.root.clone(), value)))
    }

    /// Execute the query, collecting the output.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        driver::execute(&self.root, &self.settings)
    }

    /// Execute the query, returning an iterator over the output.
    pub fn iter(&self) -> Result<std::vec::IntoIter<T>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Run `action` for every element on the partition threads.
    pub fn for_all<F>(&self, action: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let op = AggregateOperator::new("ForAll", self.root.clone(), (), Arc::new(move |(), v| action(v)));
        self.with_root(Arc::new(op)).to_vec()?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        self.aggregate_named("Count", 0, |count, _| count + 1, |a, b| a + b)
    }

    /// Fold every partition starting from `seed`, then combine the partition
    /// results with `combine`.
    ///
    /// `fold` must produce the same result regardless of how the input is
    /// split for the output to be deterministic.
    pub fn aggregate<A, F, C>(&self, seed: A, fold: F, combine: C) -> Result<A>
    where
        A: Element,
        F: Fn(A, T) -> A + Send + Sync + 'static,
        C: Fn(A, A) -> A,
    {
        self.aggregate_named("Aggregate", seed, fold, combine)
    }

    fn aggregate_named<A, F, C>(&self, name: &'static str, seed: A, fold: F, combine: C) -> Result<A>
    where
        A: Element,
        F: Fn(A, T) -> A + Send + Sync + 'static,
        C: Fn(A, A) -> A,
    {
        let op = AggregateOperator::new(name, self.root.clone(), seed.clone(), Arc::new(fold));
        let partials = self.with_root(Arc::new(op)).to_vec()?;
        catch_user_panic(|| Ok(partials.into_iter().reduce(combine).unwrap_or(seed)))
    }

    pub fn sum(&self) -> Result<T>
    where
        T: Default + Add<Output = T>,
    {
        self.aggregate_named("Sum", T::default(), |acc, v| acc + v, |a, b| a + b)
    }

    /// Smallest element, or `None` if the query is empty.
    pub fn min(&self) -> Result<Option<T>>
    where
        T: Ord,
    {
        self.aggregate_named("Min", None::<T>, |acc, v| Some(pick(acc, v, Ordering::Less)), |a, b| match b {
            Some(b) => Some(pick(a, b, Ordering::Less)),
            None => a,
        })
    }

    /// Largest element, or `None` if the query is empty.
    pub fn max(&self) -> Result<Option<T>>
    where
        T: Ord,
    {
        self.aggregate_named("Max", None::<T>, |acc, v| Some(pick(acc, v, Ordering::Greater)), |a, b| match b {
            Some(b) => Some(pick(a, b, Ordering::Greater)),
            None => a,
        })
    }

    pub fn any<F>(&self, predicate: F) -> Result<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let op = QuantifierOperator::any(self.root.clone(), Arc::new(predicate));
        Ok(self.with_root(Arc::new(op)).to_vec()?.into_iter().any(|found| found))
    }

    pub fn all<F>(&self, predicate: F) -> Result<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let op = QuantifierOperator::all(self.root.clone(), Arc::new(predicate));
        Ok(!self.with_root(Arc::new(op)).to_vec()?.into_iter().any(|found| found))
    }

    pub fn contains(&self, value: T) -> Result<bool>
    where
        T: PartialEq,
    {
        let op = QuantifierOperator::contains(self.root.clone(), value);
        Ok(self.with_root(Arc::new(op)).to_vec()?.into_iter().any(|found| found))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.any(|_| true)?)
    }

    /// Lowest positioned element. Errors if the query is empty.
    pub fn first(&self) -> Result<T> {
        self.first_or_none()?.ok_or_else(no_elements)
    }

    pub fn first_or_none(&self) -> Result<Option<T>> {
        self.search(None, SearchDirection::First)
    }

    /// Lowest positioned element matching `predicate`.
    pub fn first_where<F>(&self, predicate: F) -> Result<Option<T>>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.search(Some(Arc::new(predicate)), SearchDirection::First)
    }

    pub fn last(&self) -> Result<T> {
        self.last_or_none()?.ok_or_else(no_elements)
    }

    pub fn last_or_none(&self) -> Result<Option<T>> {
        self.search(None, SearchDirection::Last)
    }

    pub fn last_where<F>(&self, predicate: F) -> Result<Option<T>>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.search(Some(Arc::new(predicate)), SearchDirection::Last)
    }

    fn search(&self, predicate: Option<Predicate<T>>, direction: SearchDirection) -> Result<Option<T>> {
        let op = FirstLastOperator::new(self.root.clone(), predicate, direction);
        Ok(self.with_root(Arc::new(op)).to_vec()?.into_iter().next())
    }

    /// The only element. Errors if the query is empty or has more than one
    /// element.
    pub fn single(&self) -> Result<T> {
        self.single_or_none()?.ok_or_else(no_elements)
    }

    /// The only element, or `None` if empty. Errors if there's more than one
    /// element.
    pub fn single_or_none(&self) -> Result<Option<T>> {
        self.find_single(None)
    }

    /// The only element matching `predicate`, or `None` if nothing matches.
    /// Errors if more than one element matches.
    pub fn single_where<F>(&self, predicate: F) -> Result<Option<T>>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.find_single(Some(Arc::new(predicate)))
    }

    fn find_single(&self, predicate: Option<Predicate<T>>) -> Result<Option<T>> {
        let op = SingleOperator::new(self.root.clone(), predicate);
        let mut found = self.with_root(Arc::new(op)).to_vec()?;
        if found.len() > 1 {
            return Err(DbError::with_kind(
                ErrorKind::MoreThanOneElement,
                "Sequence contains more than one matching element",
            ));
        }
        Ok(found.pop())
    }

    /// Element at `index` in sequential order. Errors if out of range.
    pub fn element_at(&self, index: usize) -> Result<T> {
        self.element_at_or_none(index)?.ok_or_else(|| {
            DbError::invalid_argument("Index out of range").with_field("index", index)
        })
    }

    pub fn element_at_or_none(&self, index: usize) -> Result<Option<T>> {
        self.skip(index).first_or_none()
    }

    pub fn ordinal_index_state(&self) -> OrdinalIndexState {
        self.root.ordinal_index_state()
    }

    /// Indented tree of the query's operators.
    pub fn explain(&self) -> String {
        self.root.explain_entry().render_tree()
    }

    pub fn explain_json(&self) -> Result<String> {
        self.root.explain_entry().to_json()
    }
}

impl ParallelQuery<i64> {
    /// Query over `count` consecutive integers starting at `start`.
    pub fn range(start: i64, count: usize) -> Self {
        Self::from_operator(Arc::new(IndexedSourceOperator::new(
            "RangeSource",
            Arc::new(RangeSource::new(start, count)),
        )))
    }
}

fn no_elements() -> DbError {
    DbError::with_kind(ErrorKind::NoElements, "Sequence contains no elements")
}

fn natural_compare<K: Ord + 'static>() -> KeyCompareFn<K> {
    Arc::new(|a: &K, b: &K| a.cmp(b))
}

/// Keep `current` unless `candidate` compares as `wanted` against it.
fn pick<T: Ord>(current: Option<T>, candidate: T, wanted: Ordering) -> T {
    match current {
        Some(current) if candidate.cmp(&current) != wanted => current,
        _ => candidate,
    }
}

/// A sorted query that can take further sort keys.
///
/// Derefs to the sorted [`ParallelQuery`].
pub struct OrderedParallelQuery<T: Element, K> {
    sorted: ParallelQuery<T>,
    /// Query being sorted.
    input: ParallelQuery<T>,
    key_selector: KeySelector<T, K>,
    compare: KeyCompareFn<K>,
    key_count: usize,
}

impl<T: Element, K> Clone for OrderedParallelQuery<T, K> {
    fn clone(&self) -> Self {
        OrderedParallelQuery {
            sorted: self.sorted.clone(),
            input: self.input.clone(),
            key_selector: self.key_selector.clone(),
            compare: self.compare.clone(),
            key_count: self.key_count,
        }
    }
}

impl<T: Element, K> fmt::Debug for OrderedParallelQuery<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedParallelQuery")
            .field("sorted", &self.sorted)
            .field("key_count", &self.key_count)
            .finish_non_exhaustive()
    }
}

impl<T, K> OrderedParallelQuery<T, K>
where
    T: Element,
    K: Send + Sync + 'static,
{
    fn new(input: &ParallelQuery<T>, key_selector: KeySelector<T, K>, compare: KeyCompareFn<K>) -> Self {
        Self::with_key_count(input.clone(), key_selector, compare, 1)
    }

    fn with_key_count(
        input: ParallelQuery<T>,
        key_selector: KeySelector<T, K>,
        compare: KeyCompareFn<K>,
        key_count: usize,
    ) -> Self {
        let op = SortOperator::new(input.root.clone(), key_selector.clone(), compare.clone(), key_count);
        OrderedParallelQuery {
            sorted: input.with_root(Arc::new(op)),
            input,
            key_selector,
            compare,
            key_count,
        }
    }

    /// Break ties with another key.
    pub fn then_by<K2, F>(&self, key: F) -> OrderedParallelQuery<T, (K, K2)>
    where
        K2: Ord + Send + Sync + 'static,
        F: Fn(&T) -> K2 + Send + Sync + 'static,
    {
        self.then_by_with(key, |a: &K2, b: &K2| a.cmp(b))
    }

    pub fn then_by_descending<K2, F>(&self, key: F) -> OrderedParallelQuery<T, (K, K2)>
    where
        K2: Ord + Send + Sync + 'static,
        F: Fn(&T) -> K2 + Send + Sync + 'static,
    {
        self.then_by_with(key, |a: &K2, b: &K2| b.cmp(a))
    }

    pub fn then_by_with<K2, F, C>(&self, key: F, compare: C) -> OrderedParallelQuery<T, (K, K2)>
    where
        K2: Send + Sync + 'static,
        F: Fn(&T) -> K2 + Send + Sync + 'static,
        C: Fn(&K2, &K2) -> Ordering + Send + Sync + 'static,
    {
        let first = self.key_selector.clone();
        let key_selector: KeySelector<T, (K, K2)> = Arc::new(move |v: &T| (first(v), key(v)));
        let compare = then_compare(self.compare.clone(), Arc::new(compare));

        // Settings changed after sorting apply to the whole query.
        let input = self.input.with_settings(self.sorted.settings.clone());
        OrderedParallelQuery::with_key_count(input, key_selector, compare, self.key_count + 1)
    }

    pub fn into_query(self) -> ParallelQuery<T> {
        self.sorted
    }
}

impl<T: Element, K> Deref for OrderedParallelQuery<T, K> {
    type Target = ParallelQuery<T>;

    fn deref(&self) -> &Self::Target {
        &self.sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{parallel, sorted, test_settings};

    #[test]
    fn query_is_reusable() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2).as_ordered().filter(|v| *v > 2);
        assert_eq!(vec![5, 3, 8, 9], q.to_vec().unwrap());
        assert_eq!(vec![5, 3, 8, 9], q.to_vec().unwrap());
        assert_eq!(4, q.count().unwrap());
    }

    #[test]
    fn sources() {
        let settings = test_settings(3);
        let range = ParallelQuery::range(10, 4).with_settings(settings.clone()).as_ordered();
        assert_eq!(vec![10, 11, 12, 13], range.to_vec().unwrap());

        let repeat = ParallelQuery::repeat("x", 3).with_settings(settings.clone());
        assert_eq!(vec!["x", "x", "x"], repeat.to_vec().unwrap());

        let iterable = ParallelQuery::from_iterable(vec![4, 5, 6])
            .with_settings(settings.clone())
            .as_ordered();
        assert_eq!(OrdinalIndexState::Correct, iterable.ordinal_index_state());
        assert_eq!(vec![4, 5, 6], iterable.to_vec().unwrap());

        let empty = ParallelQuery::<u8>::empty().with_settings(settings);
        assert!(empty.to_vec().unwrap().is_empty());
    }

    #[test]
    fn element_at() {
        let q = parallel(vec![5, 3, 8, 1, 9, 2], 2);
        assert_eq!(8, q.element_at(2).unwrap());
        assert_eq!(None, q.element_at_or_none(6).unwrap());
        assert_eq!(ErrorKind::InvalidArgument, q.element_at(6).unwrap_err().kind());
    }

    #[test]
    fn sequential_matches_parallel() {
        let q = parallel((0..300).collect::<Vec<i32>>(), 4)
            .as_ordered()
            .filter(|v| v % 7 != 0)
            .map(|v| v * 2)
            .skip(10)
            .take(100);
        assert_eq!(q.to_vec().unwrap(), q.as_sequential().to_vec().unwrap());
    }

    #[test]
    fn default_mode_runs_indexed_operators_sequentially() {
        let q = ParallelQuery::from_vec((0..10).collect::<Vec<i32>>())
            .with_degree_of_parallelism(4)
            .unwrap()
            .as_ordered()
            .filter(|v| v % 2 == 0)
            .filter_indexed(|_, idx| idx < 3);
        assert_eq!(vec![0, 2, 4], q.to_vec().unwrap());
    }

    #[test]
    fn invalid_degree_of_parallelism() {
        let q = ParallelQuery::from_vec(vec![1]);
        assert_eq!(
            ErrorKind::InvalidArgument,
            q.with_degree_of_parallelism(0).unwrap_err().kind()
        );
    }

    #[test]
    fn cancellation_before_execution() {
        let token = CancellationToken::new();
        token.cancel();
        let q = parallel(vec![1, 2, 3], 2).with_cancellation(token);
        assert!(q.to_vec().unwrap_err().is_canceled());
    }

    #[test]
    fn panic_in_user_code_is_reported() {
        let q = parallel((0..100).collect::<Vec<i32>>(), 4).map(|v| {
            if v == 77 {
                panic!("bad element");
            }
            v
        });
        // Mapping over a list stays random access, filter forces streaming.
        let err = q.filter(|_| true).to_vec().unwrap_err();
        assert_eq!(ErrorKind::UserCode, err.kind());
    }

    #[test]
    fn settings_builders_keep_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let q = ParallelQuery::from_vec(vec![1, 2, 3])
            .with_cancellation(token)
            .with_degree_of_parallelism(2)
            .unwrap()
            .with_execution_mode(ExecutionMode::ForceParallelism)
            .with_striping(true);

        assert_eq!(1, q.settings().cancellation_tokens().len());
        assert!(q.to_vec().unwrap_err().is_canceled());
    }

    #[test]
    fn sequential_query_canceled_while_skipping_input() {
        let token = CancellationToken::new();
        let q = parallel((0..10_000).collect::<Vec<i32>>(), 2)
            .with_cancellation(token.clone())
            .as_sequential()
            .filter(move |v| {
                if *v == 100 {
                    token.cancel();
                }
                false
            });

        assert!(q.to_vec().unwrap_err().is_canceled());
    }

    #[test]
    fn panic_in_sequential_query_is_reported() {
        let q = ParallelQuery::from_vec((0..100).collect::<Vec<i32>>())
            .with_degree_of_parallelism(4)
            .unwrap()
            .as_ordered()
            .filter(|v| v % 2 == 0)
            .filter_indexed(|_, idx| {
                if idx == 40 {
                    panic!("bad index");
                }
                true
            });

        for mode in [ExecutionMode::Default, ExecutionMode::ForceSequential] {
            let err = q.with_execution_mode(mode).to_vec().unwrap_err();
            assert_eq!(ErrorKind::UserCode, err.kind(), "mode: {mode}");
        }
    }

    #[test]
    fn panic_in_combine_is_reported() {
        let err = parallel((0..100).collect::<Vec<i32>>(), 4)
            .aggregate(0, |acc, v| acc + v, |_, _| panic!("bad combine"))
            .unwrap_err();
        assert_eq!(ErrorKind::UserCode, err.kind());
    }

    #[test]
    fn explain_tree() {
        let q = parallel(vec![1, 2, 3], 2).filter(|v| *v > 1).take(1);
        let explain = q.explain();
        let lines: Vec<_> = explain.lines().collect();
        assert!(lines[0].starts_with("Take"));
        assert!(lines[1].starts_with("  Filter"));
        assert!(lines[2].starts_with("    ListSource"));

        let json: serde_json::Value = serde_json::from_str(&q.explain_json().unwrap()).unwrap();
        assert_eq!("Take", json["name"]);
        assert_eq!("Filter", json["children"][0]["name"]);
    }

    #[test]
    fn settings_merge_for_binary_operators() {
        let left = ParallelQuery::from_vec(vec![1, 2]).with_degree_of_parallelism(2).unwrap();
        let right = ParallelQuery::from_vec(vec![3]).with_striping(true);
        let q = left.concat(&right);
        assert_eq!(Some(2), q.settings().degree_of_parallelism);
        assert!(q.settings().prefer_striping);
        assert_eq!(vec![1, 2, 3], sorted(q.to_vec().unwrap()));
    }
}
