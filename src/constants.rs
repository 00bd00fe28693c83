//! Global constants used throughout the revision store
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Number of bits used for every operation code on the wire.
pub const OPCODE_BITS: u32 = 3;

/// Number of bits used to declare each adaptive field width in the header.
pub const WIDTH_FIELD_BITS: u32 = 5;

/// Largest width a single field may be encoded with.
///
/// Values needing more bits than this cannot be represented and are
/// rejected by the encoder.
pub const MAX_FIELD_WIDTH: u32 = 31;

/// Marker byte preceding a raw (uncompressed) encoded diff.
pub const MARKER_UNCOMPRESSED: u8 = 0x00;

/// Marker byte preceding a zlib-compressed encoded diff.
pub const MARKER_COMPRESSED: u8 = 0x01;

/// Default distance (in revision counters) between two full-revision checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u32 = 1000;

/// Default minimum length of a matched block inside the changed region.
///
/// Shorter common runs are treated as revision-unique text. Common prefixes
/// and suffixes are always matched regardless of length.
pub const DEFAULT_MINIMUM_MATCH_LENGTH: usize = 12;

/// Maximum number of anchor candidates examined per position by the block matcher.
///
/// Bounds the work spent on highly repetitive text (tables, separators).
pub const MAX_MATCH_CANDIDATES: usize = 64;

/// Default per-task byte ceiling for the pipeline (8MB)
pub const DEFAULT_TASK_BYTE_CEILING: usize = 8 * 1024 * 1024;

/// Default byte limit of a shared task pool (64MB)
pub const DEFAULT_POOL_BYTE_LIMIT: usize = 64 * 1024 * 1024;

/// Default number of queued tasks a pool accepts before reporting a task limit
pub const DEFAULT_POOL_TASK_LIMIT: usize = 256;

/// Default byte budget of a per-article reconstruction cache (32MB)
pub const DEFAULT_CACHE_BYTE_LIMIT: usize = 32 * 1024 * 1024;

/// Upper bound of the randomized backoff multiplier.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 8;
