//! Staking ledger integrity audit.
//!
//! [`reconcile`] classifies one snapshot; [`find_transition`] bisects block
//! heights for a monotonic predicate; [`Auditor`] wires both into a bounded
//! concurrent pipeline that yields an [`AuditReport`].

pub mod audit;
pub mod bisect;
pub mod config;
pub mod predicate;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod search;

pub use audit::{Auditor, SearchJob, plan_searches};
pub use bisect::{Bisection, Polarity, find_transition, find_transition_with};
pub use config::{AuditConfig, DEFAULT_WORKERS, SearchSelection};
pub use predicate::SearchKind;
pub use reconcile::{
    DuplicateController, LockMismatch, ReconcileOptions, Reconciliation, reconcile,
};
pub use report::{AuditReport, REPORT_SCHEMA_V1, TransitionMap, render_text_report};
pub use retry::RetryPolicy;
pub use search::{HistoricalSearch, TransitionOutcome};
