//! Shared fixtures for the pipeline tests: a small staking history and a
//! snapshot source wrapper that injects failures on demand.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ledgerlint_error::{AuditError, Result};
use ledgerlint_source::{EntryIter, MemoryChain, MemorySnapshot, Snapshot, SnapshotSource};
use ledgerlint_types::{
    AccountId, Balance, BlockHash, BlockHeight, BondedEntry, Cx, LedgerRecord,
};
use parking_lot::Mutex;

pub fn acct(n: u8) -> AccountId {
    AccountId::new([n; 32])
}

pub fn h(n: u64) -> BlockHeight {
    BlockHeight::new(n)
}

pub fn ledger(stash: AccountId, total: u128) -> LedgerRecord {
    LedgerRecord {
        stash,
        total: Balance::new(total),
        active: Balance::new(total),
    }
}

/// Accounts used by [`history`].
pub mod who {
    use super::{AccountId, acct};

    pub fn a() -> AccountId {
        acct(1)
    }
    pub fn b() -> AccountId {
        acct(2)
    }
    /// Controller of both `a` and `b`; bonds itself at 30, self-bonds at 45.
    pub fn c() -> AccountId {
        acct(3)
    }
    pub fn d() -> AccountId {
        acct(4)
    }
    /// Stash since 15, controller of `g` since 25.
    pub fn e() -> AccountId {
        acct(5)
    }
    pub fn f() -> AccountId {
        acct(6)
    }
    pub fn g() -> AccountId {
        acct(7)
    }
    /// Bonded at 50 to a controller with no ledger.
    pub fn orphan() -> AccountId {
        acct(8)
    }
    pub fn orphan_controller() -> AccountId {
        acct(9)
    }
}

/// History with one duplicate controller, one double-bonded account, one
/// orphan and one self-bonded stash. Best block is 60.
pub fn history() -> MemoryChain {
    let mut chain = MemoryChain::new("devnet");
    let (a, b, c, d) = (who::a(), who::b(), who::c(), who::d());
    let (e, f, g) = (who::e(), who::f(), who::g());

    chain.bond(h(10), a, c).unwrap();
    chain.set_ledger(h(10), c, ledger(a, 100)).unwrap();
    chain.bond(h(15), e, f).unwrap();
    chain.set_ledger(h(15), f, ledger(e, 40)).unwrap();
    chain.bond(h(20), b, c).unwrap();
    chain.bond(h(25), g, e).unwrap();
    chain.set_ledger(h(25), e, ledger(g, 7)).unwrap();
    chain.bond(h(30), c, d).unwrap();
    chain.set_ledger(h(30), d, ledger(c, 55)).unwrap();
    chain.bond(h(45), c, c).unwrap();
    chain.add_validator(h(45), c).unwrap();
    chain
        .bond(h(50), who::orphan(), who::orphan_controller())
        .unwrap();
    chain.set_latest(h(60)).unwrap();
    chain
}

/// Failure plan for [`FlakySource`].
#[derive(Debug, Default)]
pub struct Faults {
    /// Every n-th point lookup fails transiently (0 disables).
    pub transient_every: u64,
    /// Point lookups for this account always fail transiently.
    pub unreachable: Option<AccountId>,
    /// Point lookups for this account fail with a decode error.
    pub undecodable: Option<AccountId>,
    /// Number of upcoming bonded enumerations that fail transiently.
    pub enumeration_failures: AtomicU32,
    /// Cancel this context once `cancel_after` lookups have been served.
    pub cancel: Option<(Cx, u64)>,
    /// This height resolves the given number of times, then fails
    /// transiently for good.
    pub flaky_block: Option<(BlockHeight, u64)>,
    pub(crate) lookups: AtomicU64,
    pub(crate) resolutions: AtomicU64,
    pub failures_injected: AtomicU64,
}

impl Faults {
    fn on_lookup(&self, account: &AccountId) -> Result<()> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((cx, after)) = &self.cancel {
            if n >= *after {
                cx.cancel();
            }
        }
        if self.undecodable == Some(*account) {
            return Err(AuditError::decode(format!("bonded entry for {account} has unknown layout")));
        }
        if self.unreachable == Some(*account)
            || (self.transient_every > 0 && n % self.transient_every == 0)
        {
            self.failures_injected.fetch_add(1, Ordering::SeqCst);
            return Err(AuditError::unavailable(format!("lookup #{n} dropped")));
        }
        Ok(())
    }

    fn on_resolve(&self, height: BlockHeight) -> Result<()> {
        let Some((flaky, budget)) = self.flaky_block else {
            return Ok(());
        };
        if height != flaky || self.resolutions.fetch_add(1, Ordering::SeqCst) < budget {
            return Ok(());
        }
        self.failures_injected.fetch_add(1, Ordering::SeqCst);
        Err(AuditError::unavailable(format!("connection reset resolving {height}")))
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

/// [`MemoryChain`] behind a fault-injecting transport.
#[derive(Debug)]
pub struct FlakySource {
    pub inner: MemoryChain,
    pub faults: Arc<Faults>,
    pub probed_heights: Mutex<Vec<BlockHeight>>,
}

impl FlakySource {
    pub fn new(inner: MemoryChain, faults: Faults) -> Self {
        Self {
            inner,
            faults: Arc::new(faults),
            probed_heights: Mutex::new(Vec::new()),
        }
    }
}

impl SnapshotSource for FlakySource {
    type Snapshot = FlakySnapshot;

    fn chain_name(&self) -> Result<String> {
        self.inner.chain_name()
    }

    fn latest_height(&self) -> Result<BlockHeight> {
        self.inner.latest_height()
    }

    fn block_id_at(&self, height: BlockHeight) -> Result<BlockHash> {
        self.probed_heights.lock().push(height);
        self.faults.on_resolve(height)?;
        self.inner.block_id_at(height)
    }

    fn snapshot_at(&self, block: &BlockHash) -> Result<FlakySnapshot> {
        Ok(FlakySnapshot {
            inner: self.inner.snapshot_at(block)?,
            faults: Arc::clone(&self.faults),
        })
    }
}

#[derive(Debug)]
pub struct FlakySnapshot {
    inner: MemorySnapshot,
    faults: Arc<Faults>,
}

impl Snapshot for FlakySnapshot {
    fn height(&self) -> BlockHeight {
        self.inner.height()
    }

    fn block_hash(&self) -> BlockHash {
        self.inner.block_hash()
    }

    fn enumerate_bonded(&self) -> Result<EntryIter<'_, BondedEntry>> {
        let remaining = &self.faults.enumeration_failures;
        if remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AuditError::unavailable("bonded enumeration interrupted"));
        }
        self.inner.enumerate_bonded()
    }

    fn enumerate_ledger(&self) -> Result<EntryIter<'_, (AccountId, LedgerRecord)>> {
        self.inner.enumerate_ledger()
    }

    fn enumerate_validators(&self) -> Result<BTreeSet<AccountId>> {
        self.inner.enumerate_validators()
    }

    fn get_bonded(&self, stash: &AccountId) -> Result<Option<AccountId>> {
        self.faults.on_lookup(stash)?;
        self.inner.get_bonded(stash)
    }

    fn get_ledger(&self, controller: &AccountId) -> Result<Option<LedgerRecord>> {
        self.faults.on_lookup(controller)?;
        self.inner.get_ledger(controller)
    }

    fn get_staking_lock(&self, stash: &AccountId) -> Result<Balance> {
        self.inner.get_staking_lock(stash)
    }
}
