//! Diff model, block matching, and delta building.
//!
//! This module provides the in-memory representation of a revision delta
//! with the following guarantees:
//! - Replaying a diff against its base deterministically yields the target text
//! - Relocated blocks are expressed as cut/paste instead of delete/insert
//! - Positions always refer to the evolving output buffer

pub mod apply;
pub mod builder;
pub mod matcher;
pub mod types;

// Re-export main types for convenience
pub use builder::DeltaBuilder;
pub use matcher::{BlockMatcher, BlockTag, GreedyBlockMatcher, MatchedBlock};
pub use types::{CodecData, Diff, DiffPart, OpCode};
