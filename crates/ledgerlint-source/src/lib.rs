//! Snapshot sources: the read-only window onto historical chain state.

pub mod fixture;
pub mod memory;
pub mod traits;

pub use fixture::{ChainFixture, FixtureBlock};
pub use memory::{MemoryChain, MemorySnapshot};
pub use traits::{EntryIter, Snapshot, SnapshotSource};
