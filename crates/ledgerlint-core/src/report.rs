//! Audit report: the serializable result of a run and its text rendering.
//!
//! The JSON form carries [`REPORT_SCHEMA_V1`] so consumers can detect layout
//! changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use ledgerlint_types::{AccountId, BlockHash, BlockHeight};
use serde::{Deserialize, Serialize};

use crate::predicate::SearchKind;
use crate::reconcile::{DuplicateController, LockMismatch, Reconciliation};
use crate::search::TransitionOutcome;

/// JSON schema version for `AuditReport` consumers.
pub const REPORT_SCHEMA_V1: &str = "ledgerlint.report.v1";

pub type TransitionMap = BTreeMap<AccountId, BTreeMap<SearchKind, TransitionOutcome>>;

/// Structured result of one audit run.
///
/// Every list is in account-identifier (or enumeration) order, never in
/// worker completion order, so two runs over the same history serialize
/// identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub schema_version: String,
    pub chain: String,
    pub block_height: BlockHeight,
    pub block_hash: BlockHash,
    pub bonded_count: u64,
    pub ledger_count: u64,
    pub duplicates: Vec<DuplicateController>,
    pub orphans: Vec<AccountId>,
    pub self_bonded: Vec<AccountId>,
    pub stash_and_controller: Vec<AccountId>,
    pub lock_mismatches: Vec<LockMismatch>,
    pub transitions: TransitionMap,
}

impl AuditReport {
    pub fn new(chain: String, reconciliation: Reconciliation, transitions: TransitionMap) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_V1.to_owned(),
            chain,
            block_height: reconciliation.height,
            block_hash: reconciliation.block_hash,
            bonded_count: reconciliation.bonded_count,
            ledger_count: reconciliation.ledger_count,
            duplicates: reconciliation.duplicate_pairs,
            orphans: reconciliation.orphans,
            self_bonded: reconciliation.self_bonded,
            stash_and_controller: reconciliation.stash_and_controller.into_iter().collect(),
            lock_mismatches: reconciliation.lock_mismatches,
            transitions,
        }
    }

    /// Controllers claimed by more than one stash.
    pub fn duplicate_controllers(&self) -> BTreeSet<AccountId> {
        self.duplicates.iter().map(|d| d.controller).collect()
    }

    pub fn violation_count(&self) -> usize {
        self.duplicate_controllers().len() + self.orphans.len() + self.lock_mismatches.len()
    }

    pub fn has_violations(&self) -> bool {
        self.violation_count() > 0
    }

    /// Searches that ended without a definite answer.
    pub fn inconclusive(&self) -> impl Iterator<Item = (&AccountId, SearchKind, &str)> {
        self.transitions.iter().flat_map(|(account, searches)| {
            searches.iter().filter_map(move |(kind, outcome)| match outcome {
                TransitionOutcome::Error { detail } => Some((account, *kind, detail.as_str())),
                _ => None,
            })
        })
    }

    pub fn to_json_pretty(&self) -> String {
        // Every field serializes to plain JSON values; failure is impossible.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Plain-text rendering for terminals and logs.
#[must_use]
pub fn render_text_report(report: &AuditReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "ledgerlint report: chain {} at block {} ({})",
        report.chain, report.block_height, report.block_hash
    );
    let _ = writeln!(
        out,
        "  #bonded: {}, #ledgers: {}",
        report.bonded_count, report.ledger_count
    );

    let _ = writeln!(out, "\nduplicate controllers: {}", report.duplicates.len());
    for dup in &report.duplicates {
        let _ = writeln!(
            out,
            "  controller {} | stash 1 {} | stash 2 {} | validator: ctrl={} s1={} s2={}",
            dup.controller,
            dup.first_stash,
            dup.second_stash,
            dup.controller_is_validator,
            dup.first_stash_is_validator,
            dup.second_stash_is_validator,
        );
    }

    let _ = writeln!(out, "\norphan ledgers (bonded controller has no ledger): {}", report.orphans.len());
    for stash in &report.orphans {
        let _ = writeln!(out, "  stash {stash}");
    }

    let _ = writeln!(out, "\nstash and controller of another stash: {}", report.stash_and_controller.len());
    for account in &report.stash_and_controller {
        let _ = writeln!(out, "  {account}");
    }

    if !report.lock_mismatches.is_empty() {
        let _ = writeln!(out, "\nledger/lock mismatches: {}", report.lock_mismatches.len());
        for m in &report.lock_mismatches {
            let _ = writeln!(
                out,
                "  stash {} controller {} | ledger total {} | staking lock {}",
                m.stash, m.controller, m.ledger_total, m.locked
            );
        }
    }

    let _ = writeln!(out, "\nself-bonded: {}", report.self_bonded.len());

    if !report.transitions.is_empty() {
        let _ = writeln!(out, "\ntransitions:");
        for (account, searches) in &report.transitions {
            let _ = writeln!(out, "  {account}");
            for (kind, outcome) in searches {
                let line = match outcome {
                    TransitionOutcome::Found { height, block_hash } => {
                        format!("at block {height} ({block_hash})")
                    }
                    TransitionOutcome::NotTransitioned => "not transitioned".to_owned(),
                    TransitionOutcome::Error { detail } => format!("error: {detail}"),
                };
                let _ = writeln!(out, "    {kind}: {line}");
            }
        }
    }
    out
}
