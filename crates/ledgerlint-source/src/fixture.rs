//! JSON chain fixtures.
//!
//! A fixture lists per-block state changes; replaying them in height order
//! yields a [`MemoryChain`]. Fixtures stand in for a live node when running
//! the auditor offline and in tests.
//!
//! ```json
//! {
//!   "chain": "devnet",
//!   "latest": 40,
//!   "blocks": [
//!     { "height": 0, "bond": [["0x11..", "0x22.."]],
//!       "ledger": [["0x22..", { "stash": "0x11..", "total": 100 }]] },
//!     { "height": 7, "bond": [["0x33..", "0x22.."]] }
//!   ]
//! }
//! ```

use std::path::Path;

use ledgerlint_error::{AuditError, Result};
use ledgerlint_types::{AccountId, BalanceLock, BlockHash, BlockHeight, LedgerRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::memory::MemoryChain;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainFixture {
    pub chain: String,
    /// Best block; defaults to the highest block listed.
    #[serde(default)]
    pub latest: Option<u64>,
    /// Heights below this are reported as pruned.
    #[serde(default)]
    pub pruned_below: Option<u64>,
    #[serde(default)]
    pub blocks: Vec<FixtureBlock>,
}

/// State changes applied at one height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureBlock {
    pub height: u64,
    #[serde(default)]
    pub hash: Option<BlockHash>,
    #[serde(default)]
    pub bond: Vec<(AccountId, AccountId)>,
    #[serde(default)]
    pub unbond: Vec<AccountId>,
    #[serde(default)]
    pub ledger: Vec<(AccountId, LedgerRecord)>,
    #[serde(default)]
    pub drop_ledger: Vec<AccountId>,
    #[serde(default)]
    pub locks: Vec<(AccountId, Vec<BalanceLock>)>,
    #[serde(default)]
    pub validators: Vec<AccountId>,
    #[serde(default)]
    pub chill: Vec<AccountId>,
}

impl ChainFixture {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| AuditError::decode(format!("chain fixture parse failure: {err}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixture = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            chain = %fixture.chain,
            blocks = fixture.blocks.len(),
            "chain fixture loaded"
        );
        Ok(fixture)
    }

    /// Replay the fixture into a versioned in-memory chain.
    pub fn into_chain(self) -> Result<MemoryChain> {
        let mut blocks = self.blocks;
        blocks.sort_by_key(|block| block.height);

        let mut chain = MemoryChain::new(self.chain);
        for block in blocks {
            let height = BlockHeight::new(block.height);
            if let Some(hash) = block.hash {
                chain.set_block_hash(height, hash);
            }
            for stash in block.unbond {
                chain.unbond(height, stash)?;
            }
            for (stash, controller) in block.bond {
                chain.bond(height, stash, controller)?;
            }
            for controller in block.drop_ledger {
                chain.remove_ledger(height, controller)?;
            }
            for (controller, record) in block.ledger {
                chain.set_ledger(height, controller, record)?;
            }
            for (stash, locks) in block.locks {
                chain.set_locks(height, stash, locks)?;
            }
            for validator in block.chill {
                chain.remove_validator(height, validator)?;
            }
            for validator in block.validators {
                chain.add_validator(height, validator)?;
            }
            chain.set_latest(height.max(chain.latest()))?;
        }

        if let Some(latest) = self.latest {
            chain.set_latest(BlockHeight::new(latest)).map_err(|_| {
                AuditError::decode(format!(
                    "fixture latest {latest} is below its highest block {}",
                    chain.latest()
                ))
            })?;
        }
        if let Some(pruned) = self.pruned_below {
            chain.prune_below(BlockHeight::new(pruned));
        }
        Ok(chain)
    }
}
