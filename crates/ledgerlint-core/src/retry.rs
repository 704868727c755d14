//! Bounded retry for transient snapshot-source failures.

use std::time::Duration;

use ledgerlint_error::Result;
use ledgerlint_types::Cx;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exponential backoff: `backoff_ms * 2^(n-1)` after the n-th failure,
/// capped at `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, without sleeping between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay after the `failures`-th consecutive failure.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        let millis = self
            .backoff_ms
            .saturating_mul(1_u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Run `op`, retrying transient failures.
    ///
    /// Non-transient errors are returned at once. When the budget runs out
    /// the last transient error is returned unchanged, so callers can tell
    /// "gave up" apart from "failed for good" and decide the scope.
    pub fn run<T>(&self, cx: &Cx, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut failures = 0_u32;
        loop {
            cx.checkpoint()?;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    failures += 1;
                    if failures >= self.max_attempts.max(1) {
                        warn!(what, attempts = failures, error = %err, "retry budget exhausted");
                        return Err(err);
                    }
                    let delay = self.delay_after(failures);
                    warn!(
                        what,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient source failure, retrying"
                    );
                    cx.sleep(delay)?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
