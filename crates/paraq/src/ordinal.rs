use std::fmt;

use serde::Serialize;

/// How much is known about the order keys of a partitioned stream.
///
/// Variants are declared strongest first, so the derived ordering treats a
/// greater state as a weaker guarantee. Combining two states takes the
/// maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OrdinalIndexState {
    /// Random access by index. Keys are the element's position.
    Indexible,
    /// Keys are exactly the element's position in the sequential result.
    Correct,
    /// Keys strictly increase within a partition, with possible gaps.
    Increasing,
    /// Nothing useful is known about the keys.
    Shuffled,
}

impl OrdinalIndexState {
    /// Returns the weaker of the two states.
    pub fn worse(self, other: Self) -> Self {
        self.max(other)
    }

    pub fn is_worse_than(self, other: Self) -> bool {
        self > other
    }

    /// Determine the state an operator will see for its input given the state
    /// it requires.
    ///
    /// Returns the input state along with whether the input must be fully
    /// merged and re-indexed before the operator can run over it. A merged
    /// input always has `Correct` keys.
    pub fn require(child: Self, required: Self) -> (Self, bool) {
        if child.is_worse_than(required) {
            (OrdinalIndexState::Correct, true)
        } else {
            (child, false)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indexible => "Indexible",
            Self::Correct => "Correct",
            Self::Increasing => "Increasing",
            Self::Shuffled => "Shuffled",
        }
    }
}

impl fmt::Display for OrdinalIndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worse_takes_weaker_state() {
        use OrdinalIndexState::*;

        assert_eq!(Correct, Indexible.worse(Correct));
        assert_eq!(Shuffled, Shuffled.worse(Increasing));
        assert_eq!(Increasing, Increasing.worse(Increasing));
        assert!(Shuffled.is_worse_than(Increasing));
        assert!(!Indexible.is_worse_than(Correct));
    }

    #[test]
    fn require_forces_merge_when_too_weak() {
        use OrdinalIndexState::*;

        assert_eq!((Correct, true), OrdinalIndexState::require(Shuffled, Increasing));
        assert_eq!((Indexible, false), OrdinalIndexState::require(Indexible, Correct));
        assert_eq!((Correct, true), OrdinalIndexState::require(Increasing, Correct));
        assert_eq!((Increasing, false), OrdinalIndexState::require(Increasing, Increasing));
    }
}
