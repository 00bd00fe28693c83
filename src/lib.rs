//! Wiki Revisions - Delta-Compressed Revision History Storage
//!
//! Stores the complete edit history of a wiki page corpus as full-text
//! checkpoints followed by compact, move-aware binary deltas, and rebuilds
//! any historical revision on demand by replaying deltas from the nearest
//! checkpoint.
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;

// Main functional modules
pub mod codec;
pub mod delta;
pub mod pipeline;
pub mod reconstruction;
pub mod storage;
pub mod system;

#[cfg(test)]
mod test_support;

// Re-export commonly used items for convenience
pub use crate::codec::DiffCodec;
pub use crate::core::{ArticleId, Config, Error, Result, Revision, RevisionCounter, RevisionId};
pub use crate::delta::{DeltaBuilder, Diff, DiffPart};
pub use crate::pipeline::{Pipeline, PipelineControl, PipelineReport};
pub use crate::reconstruction::{ChronoIterator, ReconstructionEngine};
pub use crate::storage::{DeltaStore, MemDeltaStore, RevisionIndex};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging and the metrics registry
pub fn init(config: &Config) -> Result<()> {
    system::logging::init(&config.logging)?;

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    system::metrics::init_registry();

    Ok(())
}
