//! Result of waiting on a request.

use std::time::Duration;

use crate::error::WaitError;
use crate::request_id::RequestId;

/// What a waiter observed when it stopped waiting.
///
/// Keeps "answered with nothing" distinguishable from "nobody answered".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The completion signal arrived; values are in push order (possibly empty).
    Delivered(Vec<T>),
    /// The deadline passed first; whatever had arrived so far.
    TimedOut(Vec<T>),
    /// No request was registered under the id.
    Unregistered,
    /// The gateway reported an error and completed the request.
    Rejected {
        code: i32,
        message: String,
        partial: Vec<T>,
    },
}

impl<T> WaitOutcome<T> {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    #[must_use]
    pub fn is_unregistered(&self) -> bool {
        matches!(self, Self::Unregistered)
    }

    /// Values collected so far, regardless of how the wait ended.
    #[must_use]
    pub fn values(&self) -> &[T] {
        match self {
            Self::Delivered(values) | Self::TimedOut(values) => values,
            Self::Rejected { partial, .. } => partial,
            Self::Unregistered => &[],
        }
    }

    /// Flattens to the fail-open list: empty whenever nothing arrived.
    #[must_use]
    pub fn into_values(self) -> Vec<T> {
        match self {
            Self::Delivered(values) | Self::TimedOut(values) => values,
            Self::Rejected { partial, .. } => partial,
            Self::Unregistered => Vec::new(),
        }
    }

    /// Converts to a `Result`, treating everything but `Delivered` as an error.
    ///
    /// # Errors
    ///
    /// Returns a [`WaitError`] describing why no complete answer arrived.
    pub fn into_result(self, req_id: RequestId, timeout: Duration) -> Result<Vec<T>, WaitError> {
        match self {
            Self::Delivered(values) => Ok(values),
            Self::TimedOut(partial) => Err(WaitError::timed_out(req_id, timeout, partial.len())),
            Self::Unregistered => Err(WaitError::unregistered(req_id)),
            Self::Rejected { code, message, .. } => {
                Err(WaitError::rejected(req_id, code, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_values_flattens_every_variant() {
        assert_eq!(WaitOutcome::Delivered(vec![1, 2]).into_values(), vec![1, 2]);
        assert_eq!(WaitOutcome::TimedOut(vec![3]).into_values(), vec![3]);
        assert!(WaitOutcome::<i32>::Unregistered.into_values().is_empty());
        let rejected = WaitOutcome::Rejected {
            code: 162,
            message: "pacing violation".to_string(),
            partial: vec![4],
        };
        assert_eq!(rejected.into_values(), vec![4]);
    }

    #[test]
    fn test_delivered_empty_is_still_ok() {
        let result = WaitOutcome::<i32>::Delivered(vec![])
            .into_result(RequestId::new(1001), Duration::from_secs(1));
        assert_eq!(result, Ok(vec![]));
    }

    #[test]
    fn test_timed_out_into_result_reports_partial_count() {
        let err = WaitOutcome::TimedOut(vec!["a", "b"])
            .into_result(RequestId::new(1001), Duration::from_secs(2))
            .unwrap_err();
        assert_eq!(
            err,
            WaitError::timed_out(RequestId::new(1001), Duration::from_secs(2), 2)
        );
    }

    #[test]
    fn test_values_borrows_without_consuming() {
        let outcome = WaitOutcome::TimedOut(vec![7]);
        assert_eq!(outcome.values(), &[7]);
        assert!(outcome.is_timed_out());
        assert!(!outcome.is_delivered());
    }
}
