//! Audit pipeline: one reconcile pass at the latest block, then a fan-out of
//! per-account historical searches, collected into an [`AuditReport`].
//!
//! The reconcile pass must finish before any search starts. Searches run on
//! a scoped worker pool fed from a shared [`Injector`]; outcomes are keyed by
//! `(account, kind)` so the report never depends on completion order.
//!
//! A run-fatal error from any worker, an external cancel, or the deadline
//! cancels the whole pool and the run returns `Err`. Nothing partial is
//! reported.

use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_deque::{Injector, Steal};
use ledgerlint_error::{AuditError, Result};
use ledgerlint_source::SnapshotSource;
use ledgerlint_types::{AccountId, BlockHeight, Cx};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::{AuditConfig, SearchSelection};
use crate::predicate::SearchKind;
use crate::reconcile::{ReconcileOptions, Reconciliation, reconcile};
use crate::report::{AuditReport, TransitionMap};
use crate::search::{HistoricalSearch, TransitionOutcome};

pub type SearchJob = (AccountId, SearchKind);

/// Searches implied by a reconciliation, sorted and deduplicated.
///
/// Duplicate controllers get the deprecation search; accounts that are both
/// a stash and another stash's controller get the became-stash and
/// became-controller searches.
pub fn plan_searches(reconciliation: &Reconciliation, selection: SearchSelection) -> Vec<SearchJob> {
    let mut jobs: Vec<SearchJob> = reconciliation
        .duplicates
        .iter()
        .map(|controller| (*controller, SearchKind::ControllerDeprecated))
        .chain(reconciliation.stash_and_controller.iter().flat_map(|account| {
            [
                (*account, SearchKind::BecameStash),
                (*account, SearchKind::BecameController),
            ]
        }))
        .filter(|(_, kind)| selection.enabled(*kind))
        .collect();
    jobs.sort_unstable();
    jobs.dedup();
    jobs
}

/// Caller-owned audit driver over a borrowed snapshot source.
#[derive(Debug)]
pub struct Auditor<'a, S: SnapshotSource + ?Sized> {
    source: &'a S,
    config: AuditConfig,
}

impl<'a, S: SnapshotSource + ?Sized> Auditor<'a, S> {
    pub fn new(source: &'a S, config: AuditConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Run a full audit.
    pub fn run(&self, cx: &Cx) -> Result<AuditReport> {
        let cx = self.run_context(cx);
        let started = Instant::now();
        let result = self.run_inner(&cx);
        match &result {
            Ok(report) => info!(
                chain = %report.chain,
                height = %report.block_height,
                violations = report.violation_count(),
                searches = report.transitions.values().map(BTreeMap::len).sum::<usize>(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "audit finished"
            ),
            Err(err) => error!(error = %err, "audit aborted"),
        }
        result
    }

    fn run_inner(&self, cx: &Cx) -> Result<AuditReport> {
        let retry = self.config.retry;
        let chain = retry.run(cx, "chain name", || self.source.chain_name())?;
        let latest = retry.run(cx, "latest height", || self.source.latest_height())?;
        info!(%chain, %latest, workers = self.config.workers, "audit started");

        let options = ReconcileOptions {
            check_locks: self.config.check_locks,
        };
        let reconciliation = retry.run(cx, "reconcile", || {
            let block = self.source.block_id_at(latest)?;
            let snapshot = self.source.snapshot_at(&block)?;
            reconcile(&snapshot, options)
        })?;
        cx.checkpoint()?;

        let jobs = plan_searches(&reconciliation, self.config.searches);
        if !jobs.is_empty() {
            HistoricalSearch::new(self.source, latest, retry, cx.clone()).ensure_genesis()?;
        }
        let transitions = self.run_searches(cx, latest, jobs)?;
        Ok(AuditReport::new(chain, reconciliation, transitions))
    }

    /// Search one account without a reconcile pass.
    pub fn search_account(
        &self,
        cx: &Cx,
        account: &AccountId,
        kind: SearchKind,
    ) -> Result<TransitionOutcome> {
        let cx = self.run_context(cx);
        let latest = self
            .config
            .retry
            .run(&cx, "latest height", || self.source.latest_height())?;
        let search = HistoricalSearch::new(self.source, latest, self.config.retry, cx);
        search.ensure_genesis()?;
        search.outcome(kind, account)
    }

    fn run_context(&self, cx: &Cx) -> Cx {
        match self
            .config
            .timeout()
            .and_then(|timeout| Instant::now().checked_add(timeout))
        {
            Some(deadline) => cx.child().with_deadline(deadline),
            None => cx.clone(),
        }
    }

    fn run_searches(
        &self,
        cx: &Cx,
        latest: BlockHeight,
        jobs: Vec<SearchJob>,
    ) -> Result<TransitionMap> {
        if jobs.is_empty() {
            return Ok(TransitionMap::new());
        }
        let width = self.config.workers.min(jobs.len());
        info!(jobs = jobs.len(), width, "search fan-out");

        let queue = Injector::new();
        for job in jobs {
            queue.push(job);
        }
        let pool_cx = cx.child();
        let results: Mutex<BTreeMap<SearchJob, TransitionOutcome>> = Mutex::new(BTreeMap::new());
        let failure: Mutex<Option<AuditError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for worker in 0..width {
                let (queue, results, failure, pool_cx) = (&queue, &results, &failure, &pool_cx);
                scope.spawn(move || {
                    let search =
                        HistoricalSearch::new(self.source, latest, self.config.retry, pool_cx.clone());
                    let mut done = 0_usize;
                    while !pool_cx.is_cancelled() {
                        let (account, kind) = match queue.steal() {
                            Steal::Success(job) => job,
                            Steal::Retry => continue,
                            Steal::Empty => break,
                        };
                        match search.outcome(kind, &account) {
                            Ok(outcome) => {
                                results.lock().insert((account, kind), outcome);
                                done += 1;
                            }
                            Err(err) => {
                                error!(
                                    worker,
                                    account = %account.short(),
                                    %kind,
                                    error = %err,
                                    "run-fatal search failure"
                                );
                                failure.lock().get_or_insert(err);
                                pool_cx.cancel();
                            }
                        }
                    }
                    debug!(worker, done, "search worker exiting");
                });
            }
        });

        if let Some(err) = failure.into_inner() {
            return Err(err);
        }
        cx.checkpoint()?;

        let mut transitions = TransitionMap::new();
        for ((account, kind), outcome) in results.into_inner() {
            transitions.entry(account).or_default().insert(kind, outcome);
        }
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ledgerlint_source::MemoryChain;
    use ledgerlint_types::{Balance, LedgerRecord};

    use super::*;
    use crate::retry::RetryPolicy;

    fn acct(n: u8) -> AccountId {
        AccountId::new([n; 32])
    }

    fn h(n: u64) -> BlockHeight {
        BlockHeight::new(n)
    }

    fn ledger(stash: AccountId) -> LedgerRecord {
        LedgerRecord {
            stash,
            total: Balance::new(10),
            active: Balance::new(10),
        }
    }

    fn quick_config(workers: usize) -> AuditConfig {
        AuditConfig {
            workers,
            retry: RetryPolicy::immediate(2),
            ..AuditConfig::default()
        }
    }

    #[test]
    fn plan_covers_duplicates_and_double_bonded_in_order() {
        let reconciliation = Reconciliation {
            height: h(1),
            block_hash: ledgerlint_types::BlockHash::derive("devnet", 1),
            bonded_count: 0,
            ledger_count: 0,
            duplicates: BTreeSet::from([acct(9), acct(3)]),
            duplicate_pairs: Vec::new(),
            orphans: Vec::new(),
            self_bonded: Vec::new(),
            stash_and_controller: BTreeSet::from([acct(3)]),
            lock_mismatches: Vec::new(),
        };
        let jobs = plan_searches(&reconciliation, SearchSelection::default());
        assert_eq!(
            jobs,
            vec![
                (acct(3), SearchKind::ControllerDeprecated),
                (acct(3), SearchKind::BecameStash),
                (acct(3), SearchKind::BecameController),
                (acct(9), SearchKind::ControllerDeprecated),
            ]
        );
        let only_stash = SearchSelection {
            became_stash: true,
            ..SearchSelection::none()
        };
        assert_eq!(
            plan_searches(&reconciliation, only_stash),
            vec![(acct(3), SearchKind::BecameStash)]
        );
    }

    #[test]
    fn zero_workers_is_rejected_up_front() {
        let chain = MemoryChain::new("devnet");
        let err = Auditor::new(&chain, quick_config(0)).unwrap_err();
        assert!(matches!(err, AuditError::Config { .. }));
    }

    #[test]
    fn run_reports_double_bonded_transitions() {
        // 1 -> 2 at height 5, then 3 -> 1 at height 12: account 1 is both.
        let (a, b, c) = (acct(1), acct(2), acct(3));
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(5), a, b).unwrap();
        chain.set_ledger(h(5), b, ledger(a)).unwrap();
        chain.bond(h(12), c, a).unwrap();
        chain.set_ledger(h(12), a, ledger(c)).unwrap();
        chain.set_latest(h(40)).unwrap();

        let report = Auditor::new(&chain, quick_config(3))
            .unwrap()
            .run(&Cx::new())
            .unwrap();
        assert_eq!(report.stash_and_controller, vec![a]);
        let searches = &report.transitions[&a];
        assert_eq!(searches[&SearchKind::BecameStash].height(), Some(h(5)));
        assert_eq!(searches[&SearchKind::BecameController].height(), Some(h(12)));
    }

    #[test]
    fn search_account_runs_without_reconcile() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(8), acct(1), acct(2)).unwrap();
        chain.set_latest(h(90)).unwrap();
        let auditor = Auditor::new(&chain, quick_config(1)).unwrap();
        let out = auditor
            .search_account(&Cx::new(), &acct(1), SearchKind::BecameStash)
            .unwrap();
        assert_eq!(out.height(), Some(h(8)));
    }

    #[test]
    fn pre_cancelled_context_yields_no_report() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(1), acct(1), acct(1)).unwrap();
        let cx = Cx::new();
        cx.cancel();
        let err = Auditor::new(&chain, quick_config(2))
            .unwrap()
            .run(&cx)
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled));
    }
}
