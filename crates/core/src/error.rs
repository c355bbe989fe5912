//! Error types for request/response correlation.
//!
//! The callback side never returns these: every edge case there degrades to a
//! [`WaitOutcome`](crate::WaitOutcome). [`WaitError`] exists for call sites
//! that prefer `?` over matching on the outcome; [`IdError`] covers id
//! allocation.

use std::time::Duration;

use thiserror::Error;

use crate::request_id::RequestId;

/// Why a waited-on request produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// Nothing was registered under the id (never registered, or already cleared).
    #[error("no pending request registered for id {req_id}")]
    Unregistered {
        /// The id that was waited on.
        req_id: RequestId,
    },

    /// The completion signal did not arrive before the deadline.
    #[error("request {req_id} timed out after {timeout:?} ({partial} partial results)")]
    TimedOut {
        /// The id that was waited on.
        req_id: RequestId,
        /// The timeout that elapsed.
        timeout: Duration,
        /// Number of values that had arrived before the deadline.
        partial: usize,
    },

    /// The gateway reported an error for the request.
    #[error("request {req_id} rejected by gateway: {code} - {message}")]
    Rejected {
        /// The id that was waited on.
        req_id: RequestId,
        /// Gateway error code.
        code: i32,
        /// Gateway error text.
        message: String,
    },
}

impl WaitError {
    /// Creates an unregistered error.
    pub fn unregistered(req_id: RequestId) -> Self {
        Self::Unregistered { req_id }
    }

    /// Creates a timeout error.
    pub fn timed_out(req_id: RequestId, timeout: Duration, partial: usize) -> Self {
        Self::TimedOut {
            req_id,
            timeout,
            partial,
        }
    }

    /// Creates a rejection error.
    pub fn rejected(req_id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self::Rejected {
            req_id,
            code,
            message: message.into(),
        }
    }

    /// Returns true if issuing the request again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Why a request id could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdError {
    /// The configured seed is outside `0..=MAX_ID_SEED`.
    #[error("request id seed {seed} out of range 0..={max}")]
    InvalidSeed {
        /// The rejected seed.
        seed: i32,
        /// Largest accepted seed.
        max: i32,
    },

    /// Every id up to `i32::MAX` has been handed out.
    #[error("request ids exhausted (counter started at {seed})")]
    Exhausted {
        /// Seed the counter started from.
        seed: i32,
    },
}
