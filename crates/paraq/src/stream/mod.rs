//! Partitioned streams of keyed elements.

pub mod merge;
pub mod partition;

use std::fmt;

use paraq_error::{DbError, Result};

use crate::key::{KeyComparer, OrderKey};
use crate::ordinal::OrdinalIndexState;

/// Pull based cursor over a single partition.
///
/// Each call yields the next element along with its order key. Once `None`
/// is returned, all further calls also return `None`.
///
/// Resources held by an enumerator (including any barrier participation) are
/// released on drop, and dropping an enumerator drops its source.
pub trait QueryOperatorEnumerator<T>: Send {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>>;
}

pub type BoxedEnumerator<T> = Box<dyn QueryOperatorEnumerator<T>>;

/// Enumerator that never yields anything.
#[derive(Debug, Default)]
pub struct EmptyEnumerator;

impl<T> QueryOperatorEnumerator<T> for EmptyEnumerator {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        Ok(None)
    }
}

/// Enumerator over already materialized keyed elements.
#[derive(Debug)]
pub struct BufferedEnumerator<T> {
    items: std::vec::IntoIter<(T, OrderKey)>,
}

impl<T> BufferedEnumerator<T> {
    pub fn new(items: Vec<(T, OrderKey)>) -> Self {
        BufferedEnumerator {
            items: items.into_iter(),
        }
    }
}

impl<T: Send> QueryOperatorEnumerator<T> for BufferedEnumerator<T> {
    fn move_next(&mut self) -> Result<Option<(T, OrderKey)>> {
        Ok(self.items.next())
    }
}

/// A fixed number of partition enumerators along with how their keys compare
/// and what's known about them.
pub struct PartitionedStream<T> {
    partitions: Vec<BoxedEnumerator<T>>,
    comparer: KeyComparer,
    state: OrdinalIndexState,
}

impl<T> fmt::Debug for PartitionedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedStream")
            .field("partitions", &self.partitions.len())
            .field("comparer", &self.comparer)
            .field("state", &self.state)
            .finish()
    }
}

impl<T> PartitionedStream<T> {
    pub fn try_new(
        partitions: Vec<BoxedEnumerator<T>>,
        comparer: KeyComparer,
        state: OrdinalIndexState,
    ) -> Result<Self> {
        if partitions.is_empty() {
            return Err(DbError::internal(
                "Partitioned stream requires at least one partition",
            ));
        }
        Ok(PartitionedStream {
            partitions,
            comparer,
            state,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn comparer(&self) -> &KeyComparer {
        &self.comparer
    }

    pub fn ordinal_index_state(&self) -> OrdinalIndexState {
        self.state
    }

    pub fn into_parts(self) -> (Vec<BoxedEnumerator<T>>, KeyComparer, OrdinalIndexState) {
        (self.partitions, self.comparer, self.state)
    }

    pub fn with_comparer(mut self, comparer: KeyComparer) -> Self {
        self.comparer = comparer;
        self
    }

    pub fn with_ordinal_index_state(mut self, state: OrdinalIndexState) -> Self {
        self.state = state;
        self
    }

    /// Wrap every partition, keeping the comparer and setting a new state.
    pub fn wrap_partitions<U, F>(self, state: OrdinalIndexState, mut wrap: F) -> PartitionedStream<U>
    where
        F: FnMut(usize, BoxedEnumerator<T>) -> BoxedEnumerator<U>,
    {
        let partitions = self
            .partitions
            .into_iter()
            .enumerate()
            .map(|(idx, partition)| wrap(idx, partition))
            .collect();

        PartitionedStream {
            partitions,
            comparer: self.comparer,
            state,
        }
    }
}
