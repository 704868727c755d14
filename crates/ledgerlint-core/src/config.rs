//! Audit run configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! workers = 8
//! check_locks = true
//! timeout_secs = 900
//!
//! [retry]
//! max_attempts = 5
//! backoff_ms = 250
//!
//! [searches]
//! became_controller = false
//! ```

use std::path::Path;
use std::time::Duration;

use ledgerlint_error::{AuditError, Result};
use serde::{Deserialize, Serialize};

use crate::predicate::SearchKind;
use crate::retry::RetryPolicy;

/// Default width of the bisection worker pool.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Concurrent bisection workers; keep within the source's request limit.
    pub workers: usize,
    pub retry: RetryPolicy,
    pub check_locks: bool,
    /// Overall run deadline.
    pub timeout_secs: Option<u64>,
    pub searches: SearchSelection,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            check_locks: false,
            timeout_secs: None,
            searches: SearchSelection::default(),
        }
    }
}

impl AuditConfig {
    /// Parse and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Self::parse_toml(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating, for callers that layer overrides on top.
    pub fn parse_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| AuditError::config(format!("config parse failure: {err}")))
    }

    /// Read a config file. Not validated; see [`Self::parse_toml`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_toml(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AuditError::config("workers must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AuditError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.max_backoff_ms < self.retry.backoff_ms {
            return Err(AuditError::config(
                "retry.max_backoff_ms must not be below retry.backoff_ms",
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(AuditError::config("timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Which historical searches the audit schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSelection {
    /// For duplicate controllers: when the entry collapsed into self-bonded.
    pub deprecation: bool,
    /// For double-bonded accounts: when they became a stash.
    pub became_stash: bool,
    /// For double-bonded accounts: when they became a controller.
    pub became_controller: bool,
}

impl Default for SearchSelection {
    fn default() -> Self {
        Self {
            deprecation: true,
            became_stash: true,
            became_controller: true,
        }
    }
}

impl SearchSelection {
    pub const fn none() -> Self {
        Self {
            deprecation: false,
            became_stash: false,
            became_controller: false,
        }
    }

    pub const fn enabled(&self, kind: SearchKind) -> bool {
        match kind {
            SearchKind::ControllerDeprecated => self.deprecation,
            SearchKind::BecameStash => self.became_stash,
            SearchKind::BecameController => self.became_controller,
        }
    }
}
