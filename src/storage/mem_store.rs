//! In-memory delta store with per-article append-only logs.
//!
//! Architecture:
//! - articles: DashMap from article id to its ordered record log
//! - a record's key is its 1-based position in the log
//!
//! Writes for different articles never contend; writes for one article are
//! serialized by the DashMap shard lock.

use crate::core::error::{Result, StorageError};
use crate::core::types::{ArticleId, RevisionHeader, StorageKey};
use crate::storage::{DeltaRecord, DeltaStore};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Aggregate store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Articles with at least one record
    pub articles: usize,
    /// Records across all articles
    pub records: usize,
    /// Encoded payload bytes across all records
    pub payload_bytes: u64,
}

/// In-memory `DeltaStore`
#[derive(Debug, Default)]
pub struct MemDeltaStore {
    articles: DashMap<ArticleId, Vec<DeltaRecord>>,
    records: AtomicUsize,
    payload_bytes: AtomicU64,
}

impl MemDeltaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored for `article_id`
    pub fn record_count(&self, article_id: ArticleId) -> usize {
        self.articles.get(&article_id).map_or(0, |log| log.len())
    }

    /// Snapshot of store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            articles: self.articles.len(),
            records: self.records.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
        }
    }

    /// Rewrite the header of a stored record in place
    #[cfg(test)]
    pub(crate) fn tamper_header(&self, article_id: ArticleId, key: StorageKey, f: impl FnOnce(&mut RevisionHeader)) {
        if let Some(mut log) = self.articles.get_mut(&article_id) {
            if let Some(record) = log.get_mut((key.0 as usize).wrapping_sub(1)) {
                f(&mut record.header);
            }
        }
    }
}

impl DeltaStore for MemDeltaStore {
    fn put(&self, header: RevisionHeader, payload: Bytes) -> Result<StorageKey> {
        let payload_len = payload.len() as u64;
        let mut log = self.articles.entry(header.article_id).or_default();
        let key = StorageKey(log.len() as u64 + 1);
        log.push(DeltaRecord { key, header, payload });
        drop(log);

        self.records.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(payload_len, Ordering::Relaxed);
        Ok(key)
    }

    fn get_range(&self, article_id: ArticleId, after: StorageKey, through: StorageKey) -> Result<Vec<DeltaRecord>> {
        if through < after {
            return Err(StorageError::InvalidRange {
                after: after.0,
                through: through.0,
            }
            .into());
        }

        let Some(log) = self.articles.get(&article_id) else {
            return Ok(Vec::new());
        };
        // Key k lives at index k - 1
        let from = (after.0 as usize).min(log.len());
        let to = (through.0 as usize).min(log.len());
        Ok(log[from..to].to_vec())
    }
}
