//! Staking records as seen through a snapshot.

use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::account::AccountId;

/// Token amount in the chain's smallest unit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Balance(u128);

impl Balance {
    pub const ZERO: Self = Self(0);

    pub const fn new(amount: u128) -> Self {
        Self(amount)
    }

    pub const fn get(self) -> u128 {
        self.0
    }

    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for Balance {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Balance {
    fn from(amount: u128) -> Self {
        Self(amount)
    }
}

/// Width of a balance lock identifier.
pub const LOCK_ID_LEN: usize = 8;

/// Eight-byte balance lock tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId([u8; LOCK_ID_LEN]);

impl LockId {
    /// The lock placed by the staking pallet; comparable to `LedgerRecord::total`.
    pub const STAKING: Self = Self(*b"staking ");

    pub const fn new(tag: [u8; LOCK_ID_LEN]) -> Self {
        Self(tag)
    }

    pub const fn as_bytes(&self) -> &[u8; LOCK_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockId({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for LockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let tag: [u8; LOCK_ID_LEN] = raw.as_bytes().try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "lock id must be exactly {LOCK_ID_LEN} bytes, got {:?}",
                raw
            ))
        })?;
        Ok(Self(tag))
    }
}

/// One entry in an account's balance-lock set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLock {
    pub id: LockId,
    pub amount: Balance,
}

/// Staking ledger, keyed by controller in the ledger mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub stash: AccountId,
    pub total: Balance,
    #[serde(default)]
    pub active: Balance,
}

/// One `stash -> controller` pair from the bonded mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BondedEntry {
    pub stash: AccountId,
    pub controller: AccountId,
}

impl BondedEntry {
    pub const fn new(stash: AccountId, controller: AccountId) -> Self {
        Self { stash, controller }
    }

    pub fn is_self_bonded(&self) -> bool {
        self.stash == self.controller
    }
}

/// Integrity classification attached to a controller or stash.
///
/// An account may carry several verdicts at once; callers compose them.
/// Serialize-only: internally tagged enums cannot buffer `u128` balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityVerdict {
    Unique,
    DuplicateController {
        stash_a: AccountId,
        stash_b: AccountId,
    },
    /// Bonded entry exists, ledger record is missing.
    OrphanLedger,
    /// stash == controller. Tracked, not a violation.
    SelfBonded,
    LockMismatch {
        ledger_total: Balance,
        locked: Balance,
    },
}

impl IntegrityVerdict {
    /// Whether the verdict records a breach of the bonded/ledger invariants.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateController { .. } | Self::OrphanLedger | Self::LockMismatch { .. }
        )
    }
}
