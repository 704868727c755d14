//! Run-scoped cancellation context.
//!
//! A [`Cx`] is cloned into every worker of an audit run. All clones share one
//! cancel flag; cancelling any clone (or passing the deadline) makes every
//! later [`Cx::checkpoint`] fail.
//!
//! [`Cx::child`] derives a context that observes its parent's cancellation
//! but can be cancelled on its own without touching the parent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ledgerlint_error::{AuditError, Result};
use smallvec::{SmallVec, smallvec};

type Flag = Arc<AtomicBool>;

#[derive(Debug, Clone)]
pub struct Cx {
    /// Own flag first, then every ancestor's.
    lineage: SmallVec<[Flag; 2]>,
    deadline: Option<Instant>,
}

impl Default for Cx {
    fn default() -> Self {
        Self {
            lineage: smallvec![Flag::default()],
            deadline: None,
        }
    }
}

impl Cx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context: inherits cancellation and deadline from `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut lineage = SmallVec::with_capacity(self.lineage.len() + 1);
        lineage.push(Flag::default());
        lineage.extend(self.lineage.iter().cloned());
        Self {
            lineage,
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and its clones and children, not its parent.
    pub fn cancel(&self) {
        self.lineage[0].store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.lineage.iter().any(|flag| flag.load(Ordering::Acquire))
    }

    /// Fail fast if the run was cancelled or ran out of time.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AuditError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(AuditError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(25);
        let until = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(until - now));
        }
    }
}
