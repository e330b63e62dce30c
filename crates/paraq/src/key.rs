use std::cmp::Ordering;
use std::fmt;

/// Order key attached to every element flowing through a partition.
///
/// Keys are compared with a [`KeyComparer`] that's carried alongside the
/// partitions. Most streams use plain indices. Concatenation tags keys with
/// the side they came from so that everything on the left orders before
/// everything on the right.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderKey {
    /// No meaningful key. Used once order no longer matters.
    None,
    /// Position based key.
    Index(usize),
    /// Key from the left input of a concatenation.
    Left(Box<OrderKey>),
    /// Key from the right input of a concatenation.
    Right(Box<OrderKey>),
}

impl OrderKey {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(idx) => Some(*idx),
            _ => None,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Left(key) => write!(f, "L({key})"),
            Self::Right(key) => write!(f, "R({key})"),
        }
    }
}

/// Comparison used for the order keys of a partitioned stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyComparer {
    /// Derived ordering of the keys.
    Natural,
    /// Reverses the inner comparer.
    Reverse(Box<KeyComparer>),
    /// Orders all left keys before right keys, using the respective comparer
    /// within a side.
    Concat {
        left: Box<KeyComparer>,
        right: Box<KeyComparer>,
    },
}

impl KeyComparer {
    pub fn compare(&self, a: &OrderKey, b: &OrderKey) -> Ordering {
        match self {
            Self::Natural => a.cmp(b),
            Self::Reverse(inner) => inner.compare(b, a),
            Self::Concat { left, right } => match (a, b) {
                (OrderKey::Left(a), OrderKey::Left(b)) => left.compare(a, b),
                (OrderKey::Right(a), OrderKey::Right(b)) => right.compare(a, b),
                (OrderKey::Left(_), OrderKey::Right(_)) => Ordering::Less,
                (OrderKey::Right(_), OrderKey::Left(_)) => Ordering::Greater,
                (a, b) => a.cmp(b),
            },
        }
    }

    /// Returns a comparer with the opposite ordering.
    pub fn reverse(self) -> Self {
        match self {
            Self::Reverse(inner) => *inner,
            other => Self::Reverse(Box::new(other)),
        }
    }

    /// Key shaped the way this comparer expects, for an element produced
    /// without any input.
    pub fn initial_key(&self) -> OrderKey {
        match self {
            Self::Natural => OrderKey::Index(0),
            Self::Reverse(inner) => inner.initial_key(),
            Self::Concat { left, .. } => OrderKey::Left(Box::new(left.initial_key())),
        }
    }

    pub fn concat(left: KeyComparer, right: KeyComparer) -> Self {
        Self::Concat {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_orders_indices() {
        let cmp = KeyComparer::Natural;
        assert_eq!(Ordering::Less, cmp.compare(&OrderKey::Index(1), &OrderKey::Index(4)));
        assert_eq!(Ordering::Equal, cmp.compare(&OrderKey::Index(4), &OrderKey::Index(4)));
    }

    #[test]
    fn reverse_flips_and_unwraps() {
        let cmp = KeyComparer::Natural.reverse();
        assert_eq!(Ordering::Greater, cmp.compare(&OrderKey::Index(1), &OrderKey::Index(4)));
        assert_eq!(KeyComparer::Natural, cmp.reverse());
    }

    #[test]
    fn concat_orders_left_before_right() {
        let cmp = KeyComparer::concat(KeyComparer::Natural, KeyComparer::Natural.reverse());

        let l = |i| OrderKey::Left(Box::new(OrderKey::Index(i)));
        let r = |i| OrderKey::Right(Box::new(OrderKey::Index(i)));

        assert_eq!(Ordering::Less, cmp.compare(&l(100), &r(0)));
        assert_eq!(Ordering::Greater, cmp.compare(&r(0), &l(100)));
        assert_eq!(Ordering::Less, cmp.compare(&l(1), &l(2)));
        // Right side uses the reversed comparer.
        assert_eq!(Ordering::Greater, cmp.compare(&r(1), &r(2)));
    }

    #[test]
    fn initial_key_matches_comparer_shape() {
        assert_eq!(OrderKey::Index(0), KeyComparer::Natural.initial_key());
        assert_eq!(OrderKey::Index(0), KeyComparer::Natural.reverse().initial_key());

        let nested = KeyComparer::concat(
            KeyComparer::concat(KeyComparer::Natural, KeyComparer::Natural).reverse(),
            KeyComparer::Natural,
        );
        let expected = OrderKey::Left(Box::new(OrderKey::Left(Box::new(OrderKey::Index(0)))));
        assert_eq!(expected, nested.initial_key());

        let right = OrderKey::Right(Box::new(OrderKey::Index(0)));
        assert_eq!(Ordering::Less, nested.compare(&nested.initial_key(), &right));
    }
}
