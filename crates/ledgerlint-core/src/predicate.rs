//! Predicates evaluated against one snapshot for one account.

use std::fmt;
use std::str::FromStr;

use ledgerlint_error::{AuditError, Result};
use ledgerlint_source::Snapshot;
use ledgerlint_types::AccountId;
use serde::{Deserialize, Serialize};

/// Historical question asked about an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    /// The account's bonded entry is gone or points at itself.
    ControllerDeprecated,
    /// The account is a key of the bonded mapping.
    BecameStash,
    /// The account is a key of the ledger mapping.
    BecameController,
}

impl SearchKind {
    pub const ALL: [Self; 3] = [
        Self::ControllerDeprecated,
        Self::BecameStash,
        Self::BecameController,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ControllerDeprecated => "controller_deprecated",
            Self::BecameStash => "became_stash",
            Self::BecameController => "became_controller",
        }
    }

    /// Evaluate the predicate for `account` in `snapshot`.
    pub fn holds<S: Snapshot + ?Sized>(self, snapshot: &S, account: &AccountId) -> Result<bool> {
        match self {
            Self::ControllerDeprecated => Ok(snapshot
                .get_bonded(account)?
                .is_none_or(|controller| controller == *account)),
            Self::BecameStash => Ok(snapshot.get_bonded(account)?.is_some()),
            Self::BecameController => Ok(snapshot.get_ledger(account)?.is_some()),
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "controller_deprecated" | "deprecation" => Ok(Self::ControllerDeprecated),
            "became_stash" => Ok(Self::BecameStash),
            "became_controller" => Ok(Self::BecameController),
            _ => Err(AuditError::config(format!(
                "unknown search kind {s:?} (expected deprecation|became-stash|became-controller)"
            ))),
        }
    }
}
