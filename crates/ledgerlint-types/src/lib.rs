//! Shared data model for auditing a staking ledger's bonded/ledger mappings.

pub mod account;
pub mod cx;
pub mod height;
pub mod staking;

pub use account::{ACCOUNT_ID_LEN, AccountId, BLOCK_HASH_LEN, BlockHash};
pub use cx::Cx;
pub use height::BlockHeight;
pub use staking::{
    Balance, BalanceLock, BondedEntry, IntegrityVerdict, LOCK_ID_LEN, LedgerRecord, LockId,
};
