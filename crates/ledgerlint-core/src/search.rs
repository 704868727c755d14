//! Per-account historical searches.
//!
//! Each probe re-opens the snapshot source at a candidate height, so every
//! evaluation is a network round trip. Probes go through the retry policy;
//! a probe that still fails turns the whole search into an inconclusive
//! result for that account only.
//!
//! Genesis must be resolvable for any search to make sense. Callers check it
//! once per run with [`HistoricalSearch::ensure_genesis`]; a failure there is
//! a configuration error and aborts the run. Before bisecting, the predicate
//! must already hold at the latest height, otherwise the account simply has
//! not transitioned yet.

use ledgerlint_error::{AuditError, Result};
use ledgerlint_source::{Snapshot, SnapshotSource};
use ledgerlint_types::{AccountId, BlockHash, BlockHeight, Cx};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bisect::find_transition;
use crate::predicate::SearchKind;
use crate::retry::RetryPolicy;

/// Result of one account search, as handed to the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Found {
        height: BlockHeight,
        block_hash: BlockHash,
    },
    /// The predicate does not hold at the latest height.
    NotTransitioned,
    /// The search could not finish; see `detail`.
    Error { detail: String },
}

impl TransitionOutcome {
    pub fn height(&self) -> Option<BlockHeight> {
        match self {
            Self::Found { height, .. } => Some(*height),
            _ => None,
        }
    }
}

/// Historical search window fixed at the start of a run.
///
/// `latest` is resolved once; chain growth during the run does not move it.
#[derive(Debug)]
pub struct HistoricalSearch<'a, S: SnapshotSource + ?Sized> {
    source: &'a S,
    latest: BlockHeight,
    retry: RetryPolicy,
    cx: Cx,
}

impl<'a, S: SnapshotSource + ?Sized> HistoricalSearch<'a, S> {
    pub fn new(source: &'a S, latest: BlockHeight, retry: RetryPolicy, cx: Cx) -> Self {
        Self {
            source,
            latest,
            retry,
            cx,
        }
    }

    pub fn latest(&self) -> BlockHeight {
        self.latest
    }

    /// Evaluate `kind` for `account` at `height`, with retries.
    pub fn probe(&self, kind: SearchKind, account: &AccountId, height: BlockHeight) -> Result<bool> {
        let holds = self
            .retry
            .run(&self.cx, kind.as_str(), || {
                let snapshot = self.source.snapshot_at_height(height)?;
                kind.holds(&snapshot, account)
            })
            .map_err(|err| self.inconclusive(account, err))?;
        debug!(account = %account.short(), %kind, %height, holds, "probe");
        Ok(holds)
    }

    /// Bisect `kind` for `account` over `[low, latest]`.
    ///
    /// `Ok(None)` means the predicate does not hold at the latest height.
    pub fn bisect(
        &self,
        kind: SearchKind,
        account: &AccountId,
        low: BlockHeight,
    ) -> Result<Option<BlockHeight>> {
        if !self.probe(kind, account, self.latest)? {
            debug!(
                account = %account.short(),
                %kind,
                "predicate false at latest height, nothing to bisect"
            );
            return Ok(None);
        }
        let high = self.latest.get();
        let bisection = find_transition(low.get(), high, |h| {
            self.probe(kind, account, BlockHeight::new(h))
        })?;
        debug!(
            account = %account.short(),
            %kind,
            evaluations = bisection.evaluations,
            first_match = bisection.first_match,
            "bisection finished"
        );
        Ok(bisection.transition(high).map(BlockHeight::new))
    }

    /// Locate the height at which `kind` first held for `account`.
    pub fn search(&self, kind: SearchKind, account: &AccountId) -> Result<Option<BlockHeight>> {
        match kind {
            SearchKind::BecameStash | SearchKind::BecameController => {
                self.bisect(kind, account, BlockHeight::GENESIS)
            }
            SearchKind::ControllerDeprecated => self.search_deprecation(account),
        }
    }

    /// Deprecation is only meaningful for an account that is self-bonded at
    /// the latest height. The window starts where the account became a stash,
    /// so the bonded entry exists throughout and "absent" never counts as a
    /// match inside it. The window start was resolved by the first bisection
    /// and is not re-checked.
    fn search_deprecation(&self, account: &AccountId) -> Result<Option<BlockHeight>> {
        let latest_controller = self
            .retry
            .run(&self.cx, "latest bonded", || {
                self.source
                    .snapshot_at_height(self.latest)?
                    .get_bonded(account)
            })
            .map_err(|err| self.inconclusive(account, err))?;
        if latest_controller != Some(*account) {
            debug!(account = %account.short(), "controller not deprecated yet");
            return Ok(None);
        }
        let Some(window_start) = self.bisect(SearchKind::BecameStash, account, BlockHeight::GENESIS)?
        else {
            return Ok(None);
        };
        self.bisect(SearchKind::ControllerDeprecated, account, window_start)
    }

    /// Run a search and fold per-account failures into the outcome.
    ///
    /// Only run-fatal errors escape as `Err`.
    pub fn outcome(&self, kind: SearchKind, account: &AccountId) -> Result<TransitionOutcome> {
        let found = self.search(kind, account).and_then(|height| match height {
            Some(height) => {
                let block_hash = self
                    .retry
                    .run(&self.cx, "block hash", || self.source.block_id_at(height))
                    .map_err(|err| self.inconclusive(account, err))?;
                Ok(Some((height, block_hash)))
            }
            None => Ok(None),
        });
        match found {
            Ok(Some((height, block_hash))) => {
                info!(%account, %kind, %height, %block_hash, "transition found");
                Ok(TransitionOutcome::Found { height, block_hash })
            }
            Ok(None) => {
                info!(%account, %kind, "not transitioned");
                Ok(TransitionOutcome::NotTransitioned)
            }
            Err(err) if err.is_run_fatal() => Err(err),
            Err(err) => {
                info!(%account, %kind, error = %err, "search inconclusive");
                Ok(TransitionOutcome::Error {
                    detail: err.to_string(),
                })
            }
        }
    }

    /// Resolve height 0 with retries. An exhausted transient failure becomes
    /// the run-fatal [`AuditError::GenesisUnavailable`].
    pub fn ensure_genesis(&self) -> Result<()> {
        let genesis = BlockHeight::GENESIS;
        self.retry
            .run(&self.cx, "resolve genesis", || self.source.block_id_at(genesis))
            .map(|block| debug!(%block, "genesis resolvable"))
            .map_err(|err| {
                if err.is_transient() {
                    AuditError::GenesisUnavailable {
                        height: genesis.get(),
                    }
                } else {
                    err
                }
            })
    }

    fn inconclusive(&self, account: &AccountId, err: AuditError) -> AuditError {
        if err.is_transient() {
            AuditError::InconclusiveSearch {
                account: account.to_string(),
                attempts: self.retry.max_attempts.max(1),
                detail: err.to_string(),
            }
        } else {
            err
        }
    }
}
