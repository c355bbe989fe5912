//! Request identifiers and their allocator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::IdError;

/// Default base the id counter starts from. The first allocated id is `seed + 1`.
pub const DEFAULT_ID_SEED: i32 = 1000;

/// Largest accepted seed, leaving over a billion ids before exhaustion.
pub const MAX_ID_SEED: i32 = i32::MAX / 2;

/// Correlation token threaded through a gateway request so its callbacks can be
/// matched back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i32);

impl RequestId {
    /// Wraps a raw id as received from a gateway callback.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw value passed to the gateway client.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for RequestId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock-free monotonic id source.
///
/// Ids never wrap: once `i32::MAX` has been handed out every further call to
/// [`RequestIdAllocator::next`] fails with [`IdError::Exhausted`] until the
/// counter is rewound.
#[derive(Debug)]
pub struct RequestIdAllocator {
    seed: i32,
    counter: AtomicI32,
}

impl RequestIdAllocator {
    /// Creates a counter whose first id is `seed + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidSeed`] unless `0 <= seed <= MAX_ID_SEED`. A
    /// negative seed could hand out the gateway's "no request" id `-1`.
    pub fn new(seed: i32) -> Result<Self, IdError> {
        validate_seed(seed)?;
        Ok(Self {
            seed,
            counter: AtomicI32::new(seed),
        })
    }

    /// Returns an id strictly greater than every id handed out before it.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Exhausted`] once the counter has reached `i32::MAX`.
    pub fn next(&self) -> Result<RequestId, IdError> {
        self.counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map(|previous| RequestId(previous + 1))
            .map_err(|_| IdError::Exhausted { seed: self.seed })
    }

    /// Rewinds the counter to its seed.
    pub fn rewind(&self) {
        self.counter.store(self.seed, Ordering::Release);
    }

    #[must_use]
    pub fn seed(&self) -> i32 {
        self.seed
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self {
            seed: DEFAULT_ID_SEED,
            counter: AtomicI32::new(DEFAULT_ID_SEED),
        }
    }
}

/// Checks that `seed` leaves the counter non-negative and with room to grow.
///
/// # Errors
///
/// Returns [`IdError::InvalidSeed`] for seeds outside `0..=MAX_ID_SEED`.
pub fn validate_seed(seed: i32) -> Result<(), IdError> {
    if (0..=MAX_ID_SEED).contains(&seed) {
        Ok(())
    } else {
        Err(IdError::InvalidSeed {
            seed,
            max: MAX_ID_SEED,
        })
    }
}
