//! Reconstruction of historical revisions
//!
//! Revisions are rebuilt by replaying stored deltas from the nearest
//! full-revision checkpoint. Reconstructed revisions are cached per article
//! so chronological scans and nearby lookups amortize replay work.

pub mod cache;
pub mod chrono;
pub mod engine;

pub use self::cache::RevisionCache;
pub use self::chrono::ChronoIterator;
pub use self::engine::ReconstructionEngine;
