//! Single-snapshot cross-reference of the bonded and ledger mappings.
//!
//! One pass classifies every bonded entry against three rules:
//! - the bonded mapping is injective on controller (duplicate controllers)
//! - every bonded controller has a ledger record (orphan ledgers)
//! - a ledger's total equals the stash's staking lock (optional, point lookups)
//!
//! Self-bonded entries (stash == controller) are tracked but are not a
//! violation. The ledger mapping is scanned first so the bonded mapping can be
//! consumed as a stream; memory is bounded by the controller index.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use ledgerlint_error::Result;
use ledgerlint_source::Snapshot;
use ledgerlint_types::{AccountId, Balance, BlockHash, BlockHeight, IntegrityVerdict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Compare every ledger total with the stash's staking lock.
    pub check_locks: bool,
}

/// Two stashes bonded to one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateController {
    pub controller: AccountId,
    /// Stash that claimed the controller first in enumeration order.
    pub first_stash: AccountId,
    pub second_stash: AccountId,
    pub controller_is_validator: bool,
    pub first_stash_is_validator: bool,
    pub second_stash_is_validator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMismatch {
    pub controller: AccountId,
    pub stash: AccountId,
    pub ledger_total: Balance,
    pub locked: Balance,
}

/// Integrity classification of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub height: BlockHeight,
    pub block_hash: BlockHash,
    pub bonded_count: u64,
    pub ledger_count: u64,
    /// Controllers claimed by more than one stash.
    pub duplicates: BTreeSet<AccountId>,
    pub duplicate_pairs: Vec<DuplicateController>,
    /// Stashes whose controller has no ledger record, in stash order.
    pub orphans: Vec<AccountId>,
    pub self_bonded: Vec<AccountId>,
    /// Stashes bonded to a foreign controller that also control another stash.
    pub stash_and_controller: BTreeSet<AccountId>,
    pub lock_mismatches: Vec<LockMismatch>,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.orphans.is_empty() && self.lock_mismatches.is_empty()
    }

    /// Every flagged account with all of its verdicts.
    pub fn verdicts(&self) -> BTreeMap<AccountId, Vec<IntegrityVerdict>> {
        let mut out: BTreeMap<AccountId, Vec<IntegrityVerdict>> = BTreeMap::new();
        for pair in &self.duplicate_pairs {
            out.entry(pair.controller)
                .or_default()
                .push(IntegrityVerdict::DuplicateController {
                    stash_a: pair.first_stash,
                    stash_b: pair.second_stash,
                });
        }
        for stash in &self.orphans {
            out.entry(*stash)
                .or_default()
                .push(IntegrityVerdict::OrphanLedger);
        }
        for stash in &self.self_bonded {
            out.entry(*stash).or_default().push(IntegrityVerdict::SelfBonded);
        }
        for mismatch in &self.lock_mismatches {
            out.entry(mismatch.stash)
                .or_default()
                .push(IntegrityVerdict::LockMismatch {
                    ledger_total: mismatch.ledger_total,
                    locked: mismatch.locked,
                });
        }
        out
    }

    /// Verdicts for one account; `Unique` when nothing flagged it.
    pub fn verdicts_for(&self, account: &AccountId) -> Vec<IntegrityVerdict> {
        self.verdicts()
            .remove(account)
            .unwrap_or_else(|| vec![IntegrityVerdict::Unique])
    }
}

/// Classify the bonded/ledger mappings of `snapshot`.
pub fn reconcile<S: Snapshot + ?Sized>(
    snapshot: &S,
    options: ReconcileOptions,
) -> Result<Reconciliation> {
    let height = snapshot.height();
    info!(%height, check_locks = options.check_locks, "reconcile started");

    let mut ledger_controllers: HashSet<AccountId> = HashSet::new();
    let mut lock_mismatches = Vec::new();
    for entry in snapshot.enumerate_ledger()? {
        let (controller, record) = entry?;
        ledger_controllers.insert(controller);
        if options.check_locks {
            let locked = snapshot.get_staking_lock(&record.stash)?;
            if locked != record.total {
                warn!(
                    %controller,
                    stash = %record.stash,
                    ledger_total = %record.total,
                    %locked,
                    "ledger total differs from staking lock"
                );
                lock_mismatches.push(LockMismatch {
                    controller,
                    stash: record.stash,
                    ledger_total: record.total,
                    locked,
                });
            }
        }
    }
    let ledger_count = ledger_controllers.len() as u64;

    let validators = snapshot.enumerate_validators()?;

    let mut first_claim: HashMap<AccountId, AccountId> = HashMap::new();
    let mut duplicates = BTreeSet::new();
    let mut duplicate_pairs = Vec::new();
    let mut orphans = Vec::new();
    let mut self_bonded = Vec::new();
    let mut foreign_bonded = Vec::new();
    let mut bonded_count = 0_u64;

    for entry in snapshot.enumerate_bonded()? {
        let entry = entry?;
        bonded_count += 1;
        let (stash, controller) = (entry.stash, entry.controller);

        if entry.is_self_bonded() {
            self_bonded.push(stash);
        } else {
            foreign_bonded.push(stash);
        }

        match first_claim.entry(controller) {
            Entry::Occupied(first) => {
                let first_stash = *first.get();
                if first_stash != stash {
                    warn!(
                        %controller,
                        %first_stash,
                        second_stash = %stash,
                        "duplicate controller"
                    );
                    duplicates.insert(controller);
                    duplicate_pairs.push(DuplicateController {
                        controller,
                        first_stash,
                        second_stash: stash,
                        controller_is_validator: validators.contains(&controller),
                        first_stash_is_validator: validators.contains(&first_stash),
                        second_stash_is_validator: validators.contains(&stash),
                    });
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(stash);
            }
        }

        if !ledger_controllers.contains(&controller) {
            debug!(%stash, %controller, "bonded controller has no ledger");
            orphans.push(stash);
        }
    }

    // A stash bonded to someone else can only be a controller of a *different*
    // stash, so any claim on it qualifies.
    let stash_and_controller: BTreeSet<AccountId> = foreign_bonded
        .into_iter()
        .filter(|stash| first_claim.contains_key(stash))
        .collect();

    info!(
        %height,
        bonded_count,
        ledger_count,
        duplicates = duplicates.len(),
        orphans = orphans.len(),
        self_bonded = self_bonded.len(),
        stash_and_controller = stash_and_controller.len(),
        lock_mismatches = lock_mismatches.len(),
        "reconcile finished"
    );

    Ok(Reconciliation {
        height,
        block_hash: snapshot.block_hash(),
        bonded_count,
        ledger_count,
        duplicates,
        duplicate_pairs,
        orphans,
        self_bonded,
        stash_and_controller,
        lock_mismatches,
    })
}
