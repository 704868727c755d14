//! In-memory versioned chain history.
//!
//! Every key in every mapping owns a version chain: `(height, Option<value>)`
//! entries in ascending height order, where `None` is a tombstone. A snapshot
//! at height `h` resolves a key to the newest version written at or below
//! `h`. Writes are append-only per key, so a snapshot never observes a value
//! written after it was opened. Mutating the chain while snapshots are alive
//! copies the state (`Arc::make_mut`), leaving those snapshots untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hashbrown::HashMap;
use ledgerlint_error::{AuditError, Result};
use ledgerlint_types::{
    AccountId, Balance, BalanceLock, BlockHash, BlockHeight, BondedEntry, LedgerRecord, LockId,
};
use parking_lot::RwLock;
use tracing::trace;

use crate::traits::{EntryIter, Snapshot, SnapshotSource};

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionChain<T> {
    versions: Vec<(BlockHeight, Option<T>)>,
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
        }
    }
}

impl<T> VersionChain<T> {
    fn at(&self, height: BlockHeight) -> Option<&T> {
        let idx = self.versions.partition_point(|(h, _)| *h <= height);
        idx.checked_sub(1)
            .and_then(|i| self.versions[i].1.as_ref())
    }

    fn write(&mut self, height: BlockHeight, value: Option<T>) -> Result<()> {
        match self.versions.last_mut() {
            Some((last, slot)) if *last == height => {
                *slot = value;
                return Ok(());
            }
            Some((last, _)) if *last > height => {
                return Err(AuditError::internal(format!(
                    "history is append-only: write at {height} after {last}"
                )));
            }
            _ => {}
        }
        self.versions.push((height, value));
        Ok(())
    }

    fn newest_height(&self) -> Option<BlockHeight> {
        self.versions.last().map(|(h, _)| *h)
    }
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    bonded: BTreeMap<AccountId, VersionChain<AccountId>>,
    ledger: BTreeMap<AccountId, VersionChain<LedgerRecord>>,
    locks: BTreeMap<AccountId, VersionChain<Vec<BalanceLock>>>,
    validators: BTreeMap<AccountId, VersionChain<()>>,
}

/// Versioned staking state held entirely in memory.
#[derive(Debug)]
pub struct MemoryChain {
    name: String,
    state: Arc<ChainState>,
    latest: BlockHeight,
    pruned_below: BlockHeight,
    explicit_hashes: BTreeMap<BlockHeight, BlockHash>,
    resolved: RwLock<HashMap<BlockHash, BlockHeight>>,
}

impl MemoryChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
            latest: BlockHeight::GENESIS,
            pruned_below: BlockHeight::GENESIS,
            explicit_hashes: BTreeMap::new(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latest(&self) -> BlockHeight {
        self.latest
    }

    /// Extend the chain so that `height` is the best block.
    pub fn set_latest(&mut self, height: BlockHeight) -> Result<()> {
        if height < self.newest_write() {
            return Err(AuditError::internal(format!(
                "latest {height} is below already written state at {}",
                self.newest_write()
            )));
        }
        self.latest = height;
        Ok(())
    }

    /// Pin the hash reported for `height`.
    pub fn set_block_hash(&mut self, height: BlockHeight, hash: BlockHash) {
        self.explicit_hashes.insert(height, hash);
    }

    /// Refuse to serve state for heights below `height`, like a pruned node.
    pub fn prune_below(&mut self, height: BlockHeight) {
        self.pruned_below = height;
    }

    pub fn bond(&mut self, height: BlockHeight, stash: AccountId, controller: AccountId) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .bonded
            .entry(stash)
            .or_default()
            .write(height, Some(controller))
    }

    pub fn unbond(&mut self, height: BlockHeight, stash: AccountId) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .bonded
            .entry(stash)
            .or_default()
            .write(height, None)
    }

    pub fn set_ledger(
        &mut self,
        height: BlockHeight,
        controller: AccountId,
        record: LedgerRecord,
    ) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .ledger
            .entry(controller)
            .or_default()
            .write(height, Some(record))
    }

    pub fn remove_ledger(&mut self, height: BlockHeight, controller: AccountId) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .ledger
            .entry(controller)
            .or_default()
            .write(height, None)
    }

    pub fn set_locks(
        &mut self,
        height: BlockHeight,
        stash: AccountId,
        locks: Vec<BalanceLock>,
    ) -> Result<()> {
        self.touch(height);
        let value = if locks.is_empty() { None } else { Some(locks) };
        Arc::make_mut(&mut self.state)
            .locks
            .entry(stash)
            .or_default()
            .write(height, value)
    }

    pub fn add_validator(&mut self, height: BlockHeight, validator: AccountId) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .validators
            .entry(validator)
            .or_default()
            .write(height, Some(()))
    }

    pub fn remove_validator(&mut self, height: BlockHeight, validator: AccountId) -> Result<()> {
        self.touch(height);
        Arc::make_mut(&mut self.state)
            .validators
            .entry(validator)
            .or_default()
            .write(height, None)
    }

    fn touch(&mut self, height: BlockHeight) {
        if height > self.latest {
            self.latest = height;
        }
    }

    fn newest_write(&self) -> BlockHeight {
        let state = &self.state;
        let bonded = state.bonded.values().filter_map(VersionChain::newest_height);
        let ledger = state.ledger.values().filter_map(VersionChain::newest_height);
        let locks = state.locks.values().filter_map(VersionChain::newest_height);
        let validators = state.validators.values().filter_map(VersionChain::newest_height);
        bonded
            .chain(ledger)
            .chain(locks)
            .chain(validators)
            .max()
            .unwrap_or(BlockHeight::GENESIS)
    }
}

impl SnapshotSource for MemoryChain {
    type Snapshot = MemorySnapshot;

    fn chain_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn latest_height(&self) -> Result<BlockHeight> {
        Ok(self.latest)
    }

    fn block_id_at(&self, height: BlockHeight) -> Result<BlockHash> {
        if height > self.latest {
            return Err(AuditError::unavailable(format!(
                "block {height} is beyond best block {}",
                self.latest
            )));
        }
        if height < self.pruned_below {
            return Err(AuditError::unavailable(format!(
                "state for block {height} has been pruned (kept from {})",
                self.pruned_below
            )));
        }
        let hash = self
            .explicit_hashes
            .get(&height)
            .copied()
            .unwrap_or_else(|| BlockHash::derive(&self.name, height.get()));
        self.resolved.write().insert(hash, height);
        Ok(hash)
    }

    fn snapshot_at(&self, block: &BlockHash) -> Result<MemorySnapshot> {
        let height = self.resolved.read().get(block).copied().ok_or_else(|| {
            AuditError::unavailable(format!("unknown block {block}"))
        })?;
        trace!(chain = %self.name, %height, %block, "opening memory snapshot");
        Ok(MemorySnapshot {
            state: Arc::clone(&self.state),
            height,
            hash: *block,
        })
    }
}

/// Snapshot handle over a [`MemoryChain`] at one height.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    state: Arc<ChainState>,
    height: BlockHeight,
    hash: BlockHash,
}

impl Snapshot for MemorySnapshot {
    fn height(&self) -> BlockHeight {
        self.height
    }

    fn block_hash(&self) -> BlockHash {
        self.hash
    }

    fn enumerate_bonded(&self) -> Result<EntryIter<'_, BondedEntry>> {
        let height = self.height;
        Ok(Box::new(self.state.bonded.iter().filter_map(
            move |(stash, chain)| {
                chain
                    .at(height)
                    .map(|controller| Ok::<_, AuditError>(BondedEntry::new(*stash, *controller)))
            },
        )))
    }

    fn enumerate_ledger(&self) -> Result<EntryIter<'_, (AccountId, LedgerRecord)>> {
        let height = self.height;
        Ok(Box::new(self.state.ledger.iter().filter_map(
            move |(controller, chain)| {
                chain
                    .at(height)
                    .map(|record| Ok::<_, AuditError>((*controller, record.clone())))
            },
        )))
    }

    fn enumerate_validators(&self) -> Result<BTreeSet<AccountId>> {
        Ok(self
            .state
            .validators
            .iter()
            .filter(|(_, chain)| chain.at(self.height).is_some())
            .map(|(id, _)| *id)
            .collect())
    }

    fn get_bonded(&self, stash: &AccountId) -> Result<Option<AccountId>> {
        Ok(self
            .state
            .bonded
            .get(stash)
            .and_then(|chain| chain.at(self.height))
            .copied())
    }

    fn get_ledger(&self, controller: &AccountId) -> Result<Option<LedgerRecord>> {
        Ok(self
            .state
            .ledger
            .get(controller)
            .and_then(|chain| chain.at(self.height))
            .cloned())
    }

    fn get_staking_lock(&self, stash: &AccountId) -> Result<Balance> {
        let amount = self
            .state
            .locks
            .get(stash)
            .and_then(|chain| chain.at(self.height))
            .and_then(|locks| locks.iter().find(|lock| lock.id == LockId::STAKING))
            .map_or(Balance::ZERO, |lock| lock.amount);
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(n: u8) -> AccountId {
        AccountId::new([n; 32])
    }

    fn h(n: u64) -> BlockHeight {
        BlockHeight::new(n)
    }

    fn ledger(stash: AccountId, total: u128) -> LedgerRecord {
        LedgerRecord {
            stash,
            total: Balance::new(total),
            active: Balance::new(total),
        }
    }

    #[test]
    fn snapshot_resolves_newest_version_at_or_below_height() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(5), acct(1), acct(2)).unwrap();
        chain.bond(h(9), acct(1), acct(1)).unwrap();
        chain.set_latest(h(12)).unwrap();

        let at4 = chain.snapshot_at_height(h(4)).unwrap();
        let at5 = chain.snapshot_at_height(h(5)).unwrap();
        let at8 = chain.snapshot_at_height(h(8)).unwrap();
        let at12 = chain.snapshot_at_height(h(12)).unwrap();
        assert_eq!(at4.get_bonded(&acct(1)).unwrap(), None);
        assert_eq!(at5.get_bonded(&acct(1)).unwrap(), Some(acct(2)));
        assert_eq!(at8.get_bonded(&acct(1)).unwrap(), Some(acct(2)));
        assert_eq!(at12.get_bonded(&acct(1)).unwrap(), Some(acct(1)));
    }

    #[test]
    fn tombstones_hide_keys_from_enumeration() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(1), acct(3), acct(4)).unwrap();
        chain.bond(h(1), acct(1), acct(2)).unwrap();
        chain.unbond(h(6), acct(3)).unwrap();

        let early = chain.snapshot_at_height(h(2)).unwrap();
        let stashes: Vec<_> = early
            .enumerate_bonded()
            .unwrap()
            .map(|entry| entry.unwrap().stash)
            .collect();
        assert_eq!(stashes, vec![acct(1), acct(3)]);

        let late = chain.snapshot_at_height(h(6)).unwrap();
        assert_eq!(late.enumerate_bonded().unwrap().count(), 1);
    }

    #[test]
    fn writes_are_append_only_per_key() {
        let mut chain = MemoryChain::new("devnet");
        chain.set_ledger(h(10), acct(2), ledger(acct(1), 5)).unwrap();
        let err = chain.set_ledger(h(3), acct(2), ledger(acct(1), 6)).unwrap_err();
        assert!(matches!(err, AuditError::Internal(_)));
        // Same-height rewrite replaces the version.
        chain.set_ledger(h(10), acct(2), ledger(acct(1), 7)).unwrap();
        let snap = chain.snapshot_at_height(h(10)).unwrap();
        assert_eq!(snap.get_ledger(&acct(2)).unwrap().unwrap().total, Balance::new(7));
    }

    #[test]
    fn open_snapshots_are_isolated_from_later_writes() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(1), acct(1), acct(2)).unwrap();
        chain.set_latest(h(4)).unwrap();
        let snap = chain.snapshot_at_height(h(4)).unwrap();
        chain.bond(h(4), acct(9), acct(9)).unwrap();
        assert_eq!(snap.enumerate_bonded().unwrap().count(), 1);
        let fresh = chain.snapshot_at_height(h(4)).unwrap();
        assert_eq!(fresh.enumerate_bonded().unwrap().count(), 2);
    }

    #[test]
    fn staking_lock_defaults_to_zero() {
        let mut chain = MemoryChain::new("devnet");
        chain
            .set_locks(
                h(2),
                acct(1),
                vec![
                    BalanceLock {
                        id: LockId::new(*b"vesting "),
                        amount: Balance::new(40),
                    },
                    BalanceLock {
                        id: LockId::STAKING,
                        amount: Balance::new(90),
                    },
                ],
            )
            .unwrap();
        let snap = chain.snapshot_at_height(h(2)).unwrap();
        assert_eq!(snap.get_staking_lock(&acct(1)).unwrap(), Balance::new(90));
        assert_eq!(snap.get_staking_lock(&acct(2)).unwrap(), Balance::ZERO);
    }

    #[test]
    fn validators_follow_history() {
        let mut chain = MemoryChain::new("devnet");
        chain.add_validator(h(1), acct(1)).unwrap();
        chain.add_validator(h(2), acct(2)).unwrap();
        chain.remove_validator(h(3), acct(1)).unwrap();
        let at2 = chain.snapshot_at_height(h(2)).unwrap();
        let at3 = chain.snapshot_at_height(h(3)).unwrap();
        assert_eq!(at2.enumerate_validators().unwrap().len(), 2);
        assert_eq!(
            at3.enumerate_validators().unwrap().into_iter().collect::<Vec<_>>(),
            vec![acct(2)]
        );
    }

    #[test]
    fn heights_outside_history_are_unavailable() {
        let mut chain = MemoryChain::new("devnet");
        chain.set_latest(h(10)).unwrap();
        chain.prune_below(h(3));
        assert!(chain.block_id_at(h(11)).unwrap_err().is_transient());
        assert!(chain.block_id_at(h(2)).is_err());
        assert!(chain.block_id_at(h(3)).is_ok());
    }

    #[test]
    fn unknown_block_hash_is_rejected() {
        let chain = MemoryChain::new("devnet");
        let stray = BlockHash::derive("other", 0);
        assert!(chain.snapshot_at(&stray).is_err());
    }

    #[test]
    fn explicit_hashes_win_over_derived_ones() {
        let mut chain = MemoryChain::new("devnet");
        chain.set_latest(h(3)).unwrap();
        let pinned = BlockHash::new([0xaa; 32]);
        chain.set_block_hash(h(2), pinned);
        assert_eq!(chain.block_id_at(h(2)).unwrap(), pinned);
        assert_eq!(chain.snapshot_at(&pinned).unwrap().height(), h(2));
        assert_eq!(
            chain.block_id_at(h(1)).unwrap(),
            BlockHash::derive("devnet", 1)
        );
    }

    #[test]
    fn set_latest_cannot_rewind_below_written_state() {
        let mut chain = MemoryChain::new("devnet");
        chain.bond(h(8), acct(1), acct(2)).unwrap();
        assert!(chain.set_latest(h(7)).is_err());
        assert!(chain.set_latest(h(8)).is_ok());
    }
}
