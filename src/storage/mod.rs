//! Storage layer for encoded revision deltas
//!
//! This module provides the delta store abstraction consumed by the
//! pipeline (writes) and the reconstruction engine (range reads), an
//! in-memory implementation, and the checkpoint/revision index that
//! translates revision counters into storage keys.
//!
//! Keys are dense per article: the n-th record written for an article gets
//! `StorageKey(n)`, starting at 1. Range reads return records in key order,
//! which is also chronological order.

pub mod index;
pub mod mem_store;

pub use index::{ArticleIndex, ArticleIndexBuilder, Checkpoint, RevisionIndex, RevisionStamp};
pub use mem_store::{MemDeltaStore, StoreStats};

use crate::core::error::Result;
use crate::core::types::{ArticleId, RevisionHeader, StorageKey};
use bytes::Bytes;

/// One stored delta: the revision metadata and the encoded diff
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    /// Position of the record within its article
    pub key: StorageKey,
    /// Revision metadata, including the revision counter checked on replay
    pub header: RevisionHeader,
    /// Encoded diff as produced by `DiffCodec::encode`
    pub payload: Bytes,
}

/// Trait for delta store implementations
///
/// The store is append-only. Implementations are shared between pipeline
/// writer threads and readers, so every method takes `&self`.
pub trait DeltaStore: Send + Sync {
    /// Append an encoded diff for `header.article_id` and return its key
    fn put(&self, header: RevisionHeader, payload: Bytes) -> Result<StorageKey>;

    /// Records of `article_id` with keys in `(after, through]`, in key order.
    ///
    /// Records not written yet are simply absent from the result; callers
    /// that need the complete range wait and ask again.
    fn get_range(&self, article_id: ArticleId, after: StorageKey, through: StorageKey) -> Result<Vec<DeltaRecord>>;
}
