//! Query operators.
//!
//! Each operator declares the ordinal state it needs from its input. If the
//! input's state is weaker, the input is fully merged and re-indexed before
//! the operator runs over it (a premature merge).

pub mod aggregate;
pub mod concat;
pub mod default_if_empty;
pub mod distinct;
pub mod filter;
pub mod first_last;
pub mod group_by;
pub mod map;
pub mod ordering;
pub mod quantifier;
pub mod reverse;
pub mod set_ops;
pub mod single;
pub mod sort;
pub mod take_skip;
pub mod take_skip_while;

use std::sync::Arc;

use paraq_error::{OptionExt, Result};

use crate::key::OrderKey;

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Predicate also receiving the element's position in the sequential
/// result.
pub type IndexedPredicate<T> = Arc<dyn Fn(&T, usize) -> bool + Send + Sync>;

pub type KeySelector<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// Predicate for operators that accept either a plain or positional
/// predicate.
pub enum ElementPredicate<T> {
    Plain(Predicate<T>),
    Indexed(IndexedPredicate<T>),
}

impl<T> Clone for ElementPredicate<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(p) => Self::Plain(p.clone()),
            Self::Indexed(p) => Self::Indexed(p.clone()),
        }
    }
}

impl<T> ElementPredicate<T> {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed(_))
    }

    /// Evaluate the predicate. `index` is only used by positional
    /// predicates.
    pub fn evaluate(&self, element: &T, index: usize) -> bool {
        match self {
            Self::Plain(p) => p(element),
            Self::Indexed(p) => p(element, index),
        }
    }

    /// Evaluate the predicate for an element from a partitioned stream. A
    /// positional predicate reads the position from the element's key.
    pub fn evaluate_keyed(&self, element: &T, key: &OrderKey) -> Result<bool> {
        match self {
            Self::Plain(p) => Ok(p(element)),
            Self::Indexed(p) => {
                let index = key
                    .as_index()
                    .required("positional key for indexed predicate")?;
                Ok(p(element, index))
            }
        }
    }
}
