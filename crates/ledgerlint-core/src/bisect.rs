//! Monotonic-predicate bisection over block heights.
//!
//! Contract: over `[low, high]` the predicate is false below some unknown
//! boundary `B` and true from `B` on. [`find_transition`] returns `B` using at
//! most `ceil(log2(high - low + 2))` evaluations. When the predicate never
//! holds, the result is `high + 1`; use [`Bisection::transition`] to turn that
//! into `None` rather than printing an out-of-range height.
//!
//! Monotonicity is a precondition, not something the search verifies. A
//! predicate error aborts the search and is returned as is; no default truth
//! value is ever substituted for a failed evaluation.

use ledgerlint_error::{AuditError, Result};
use tracing::trace;

/// Which truth value marks the "found" side of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Seek the first height where the predicate is true.
    #[default]
    FirstTrue,
    /// Seek the first height where the predicate is false.
    FirstFalse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bisection {
    /// First height satisfying the search, or `high + 1` if none does.
    pub first_match: u64,
    pub evaluations: u32,
}

impl Bisection {
    /// The boundary height, if it lies inside `[.., high]`.
    #[must_use]
    pub fn transition(&self, high: u64) -> Option<u64> {
        (self.first_match <= high).then_some(self.first_match)
    }
}

/// Find the first height in `[low, high]` at which `predicate` holds.
pub fn find_transition<F>(low: u64, high: u64, predicate: F) -> Result<Bisection>
where
    F: FnMut(u64) -> Result<bool>,
{
    find_transition_with(Polarity::FirstTrue, low, high, predicate)
}

/// [`find_transition`] with caller-chosen polarity.
pub fn find_transition_with<F>(
    polarity: Polarity,
    low: u64,
    high: u64,
    mut predicate: F,
) -> Result<Bisection>
where
    F: FnMut(u64) -> Result<bool>,
{
    // `high + 1` must stay representable as the "not found" answer.
    if low > high || high == u64::MAX {
        return Err(AuditError::InvalidRange { low, high });
    }

    let mut start = low;
    let mut end = high;
    let mut evaluations = 0_u32;

    while start <= end {
        let mid = start + (end - start) / 2;
        evaluations += 1;
        let holds = predicate(mid)?;
        let found = match polarity {
            Polarity::FirstTrue => holds,
            Polarity::FirstFalse => !holds,
        };
        trace!(start, end, mid, found, "bisection step");
        if found {
            if mid == 0 {
                break;
            }
            end = mid - 1;
        } else {
            start = mid + 1;
        }
    }

    Ok(Bisection {
        first_match: start,
        evaluations,
    })
}
