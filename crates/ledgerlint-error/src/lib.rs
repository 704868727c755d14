//! Error taxonomy shared by every ledgerlint crate.
//!
//! Failures fall into three scopes:
//! - **transient**: the snapshot source dropped a request; worth retrying
//! - **per-account**: one bisection could not finish; sibling searches go on
//! - **run-fatal**: the classification itself can no longer be trusted, so
//!   the run aborts without emitting a partial report

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Transport or connection loss while talking to the snapshot source.
    #[error("snapshot source unavailable: {detail}")]
    SourceUnavailable { detail: String },

    /// Returned data did not match the expected on-chain encoding.
    #[error("decode error: {detail}")]
    Decode { detail: String },

    /// The lower bound of a historical search cannot be resolved.
    #[error("block {height} cannot be resolved by the snapshot source")]
    GenesisUnavailable { height: u64 },

    #[error("invalid search range: low {low} > high {high}")]
    InvalidRange { low: u64, high: u64 },

    /// A bisection step exhausted its retry budget.
    #[error("search for {account} inconclusive after {attempts} attempts: {detail}")]
    InconclusiveSearch {
        account: String,
        attempts: u32,
        detail: String,
    },

    #[error("audit run cancelled")]
    Cancelled,

    #[error("audit run exceeded its deadline")]
    DeadlineExceeded,

    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuditError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            detail: detail.into(),
        }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }

    /// Whether the error invalidates the whole run rather than one account.
    #[must_use]
    pub const fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::GenesisUnavailable { .. }
                | Self::Cancelled
                | Self::DeadlineExceeded
                | Self::Internal(_)
        )
    }
}
