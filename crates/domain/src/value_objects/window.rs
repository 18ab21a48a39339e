use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous range of block indices examined in one localization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    /// First block synced, inclusive.
    pub start_index: i64,
    /// Last block synced, inclusive.
    pub end_index: i64,
}

impl SearchWindow {
    /// Creates a window over `[start_index, end_index]`.
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidWindow`] if the range is empty.
    pub fn new(start_index: i64, end_index: i64) -> Result<Self, DomainError> {
        if start_index > end_index {
            return Err(DomainError::InvalidWindow {
                start: start_index,
                end: end_index,
            });
        }
        Ok(Self {
            start_index,
            end_index,
        })
    }

    /// First window for a failure observed at `failure_index`. A failure
    /// observed at genesis yields the single-block window over genesis.
    ///
    /// # Errors
    /// Returns an error if `step` is not positive or `failure_index` lies
    /// before genesis.
    pub fn initial(failure_index: i64, step: i64, genesis_index: i64) -> Result<Self, DomainError> {
        if step <= 0 {
            return Err(DomainError::InvalidStep(step));
        }
        let start = failure_index.saturating_sub(step).max(genesis_index);
        Self::new(start, failure_index)
    }

    /// The window covering the `step` blocks before this one, or `None`
    /// once history down to genesis is used up.
    pub fn preceding(&self, step: i64, genesis_index: i64) -> Option<Self> {
        let start = self.start_index.saturating_sub(step).max(genesis_index);
        let end = self.end_index.saturating_sub(step);
        if end <= start {
            return None;
        }
        Some(Self {
            start_index: start,
            end_index: end,
        })
    }
}

impl fmt::Display for SearchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_index, self.end_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_three_windows() {
        let first = SearchWindow::initial(1000, 250, 0).unwrap();
        let second = first.preceding(250, 0).unwrap();
        let third = second.preceding(250, 0).unwrap();

        assert_eq!((first.start_index, first.end_index), (750, 1000));
        assert_eq!((second.start_index, second.end_index), (500, 750));
        assert_eq!((third.start_index, third.end_index), (250, 500));
        assert!(second.end_index < first.end_index && third.end_index < second.end_index);
    }

    #[test]
    fn test_windows_clamp_to_genesis_and_exhaust() {
        let window = SearchWindow::initial(300, 250, 10).unwrap();
        assert_eq!(window.start_index, 50);

        let next = window.preceding(250, 10).unwrap();
        assert_eq!((next.start_index, next.end_index), (10, 50));
        assert!(next.preceding(250, 10).is_none());
    }

    #[test]
    fn test_initial_clamped_below_genesis() {
        let window = SearchWindow::initial(100, 250, 0).unwrap();
        assert_eq!((window.start_index, window.end_index), (0, 100));
        assert!(window.preceding(250, 0).is_none());
    }

    #[test]
    fn test_failure_at_genesis_searches_genesis_only() {
        let window = SearchWindow::initial(0, 250, 0).unwrap();
        assert_eq!((window.start_index, window.end_index), (0, 0));
        assert!(window.preceding(250, 0).is_none());
    }

    #[test]
    fn test_rejects_degenerate_windows() {
        assert!(SearchWindow::new(6, 5).is_err());
        assert!(SearchWindow::initial(3, 250, 10).is_err());
        assert_eq!(
            SearchWindow::initial(10, 0, 0),
            Err(DomainError::InvalidStep(0))
        );
    }
}
