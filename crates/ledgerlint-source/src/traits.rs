//! Snapshot source interface.
//!
//! A [`SnapshotSource`] resolves block heights to block identifiers and opens
//! read-only [`Snapshot`]s. Every operation may suspend on the network; every
//! failure surfaces as `SourceUnavailable` (transport) or `Decode` (schema
//! drift). Absence of a value is `Ok(None)`, never an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use ledgerlint_error::Result;
use ledgerlint_types::{AccountId, Balance, BlockHash, BlockHeight, BondedEntry, LedgerRecord};

/// Lazily produced, key-ordered stream of mapping entries.
pub type EntryIter<'a, T> = Box<dyn Iterator<Item = Result<T>> + Send + 'a>;

/// Immutable view of staking state as of one block.
pub trait Snapshot: Send + Sync {
    fn height(&self) -> BlockHeight;

    fn block_hash(&self) -> BlockHash;

    /// All `stash -> controller` pairs in ascending stash order.
    fn enumerate_bonded(&self) -> Result<EntryIter<'_, BondedEntry>>;

    /// All `controller -> ledger` pairs in ascending controller order.
    fn enumerate_ledger(&self) -> Result<EntryIter<'_, (AccountId, LedgerRecord)>>;

    fn enumerate_validators(&self) -> Result<BTreeSet<AccountId>>;

    fn get_bonded(&self, stash: &AccountId) -> Result<Option<AccountId>>;

    fn get_ledger(&self, controller: &AccountId) -> Result<Option<LedgerRecord>>;

    /// Amount under the staking lock for `stash`; zero when no such lock.
    fn get_staking_lock(&self, stash: &AccountId) -> Result<Balance>;
}

/// Connection to a chain's historical state.
pub trait SnapshotSource: Send + Sync {
    type Snapshot: Snapshot;

    fn chain_name(&self) -> Result<String>;

    fn latest_height(&self) -> Result<BlockHeight>;

    fn block_id_at(&self, height: BlockHeight) -> Result<BlockHash>;

    fn snapshot_at(&self, block: &BlockHash) -> Result<Self::Snapshot>;

    /// Resolve `height` and open its snapshot in one step.
    fn snapshot_at_height(&self, height: BlockHeight) -> Result<Self::Snapshot> {
        let block = self.block_id_at(height)?;
        self.snapshot_at(&block)
    }
}

impl<S: SnapshotSource + ?Sized> SnapshotSource for Arc<S> {
    type Snapshot = S::Snapshot;

    fn chain_name(&self) -> Result<String> {
        (**self).chain_name()
    }

    fn latest_height(&self) -> Result<BlockHeight> {
        (**self).latest_height()
    }

    fn block_id_at(&self, height: BlockHeight) -> Result<BlockHash> {
        (**self).block_id_at(height)
    }

    fn snapshot_at(&self, block: &BlockHash) -> Result<Self::Snapshot> {
        (**self).snapshot_at(block)
    }
}
