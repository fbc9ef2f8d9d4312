//! Tagged outcome for search-style applications.
//!
//! Search branches report whether to keep going, that they found a solution,
//! or that they were pruned by the current global bound. The tag is returned
//! up the call tree as an ordinary value.

use serde::{Deserialize, Serialize};

/// Result of exploring one branch of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchOutcome<T> {
    /// Branch exhausted without a solution
    Continue,
    /// Branch produced a solution
    SolutionFound(T),
    /// Branch pruned because it cannot beat the current bound
    CutoffExceeded,
}

impl<T> SearchOutcome<T> {
    /// True if a solution was found
    #[must_use]
    pub fn is_solution(&self) -> bool {
        matches!(self, Self::SolutionFound(_))
    }

    /// Take the solution, if any
    #[must_use]
    pub fn solution(self) -> Option<T> {
        match self {
            Self::SolutionFound(value) => Some(value),
            _ => None,
        }
    }

    /// Combine two sibling outcomes.
    ///
    /// A solution beats everything (the left one wins a tie); a cutoff on
    /// one side does not hide an exhausted search on the other.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::SolutionFound(v), _) | (_, Self::SolutionFound(v)) => Self::SolutionFound(v),
            (Self::Continue, _) | (_, Self::Continue) => Self::Continue,
            (Self::CutoffExceeded, Self::CutoffExceeded) => Self::CutoffExceeded,
        }
    }
}

impl<T> Default for SearchOutcome<T> {
    fn default() -> Self {
        Self::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solution_wins() {
        let a: SearchOutcome<u32> = SearchOutcome::Continue;
        let b = SearchOutcome::SolutionFound(3);
        assert_eq!(a.or(b), SearchOutcome::SolutionFound(3));
        assert_eq!(
            SearchOutcome::SolutionFound(1).or(SearchOutcome::SolutionFound(2)),
            SearchOutcome::SolutionFound(1)
        );
    }

    #[test]
    fn test_cutoff_only_when_both_cut() {
        let cut: SearchOutcome<u32> = SearchOutcome::CutoffExceeded;
        assert_eq!(cut.clone().or(SearchOutcome::Continue), SearchOutcome::Continue);
        assert_eq!(cut.clone().or(cut), SearchOutcome::CutoffExceeded);
    }

    #[test]
    fn test_solution_accessors() {
        assert!(SearchOutcome::SolutionFound(5).is_solution());
        assert_eq!(SearchOutcome::SolutionFound(5).solution(), Some(5));
        assert_eq!(SearchOutcome::<u8>::default().solution(), None);
    }
}
