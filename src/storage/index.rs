//! Checkpoint and revision index
//!
//! Each article's checkpoints are kept in an arena sorted by start counter.
//! Neighbours are linked by index, and lookups binary-search the arena. Every
//! checkpoint owns the half-open counter range up to the next checkpoint, so
//! the arena partitions `1..=revision_count` without gaps.

use crate::core::error::{Error, Result, StorageError};
use crate::core::types::{ArticleId, RevisionCounter, RevisionHeader, RevisionId, StorageKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::ops::Range;
use std::sync::Arc;

/// A full-revision record and the counter range it owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// First revision counter owned by this checkpoint
    pub start_counter: RevisionCounter,
    /// Storage key of the full revision
    pub key: StorageKey,
    /// Arena index of the previous checkpoint
    pub prev: Option<usize>,
    /// Arena index of the next checkpoint
    pub next: Option<usize>,
}

/// Per-revision index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionStamp {
    /// Globally unique revision id
    pub revision_id: RevisionId,
    /// Revision timestamp
    pub timestamp: DateTime<Utc>,
    /// Storage key of the revision's delta
    pub key: StorageKey,
}

/// Immutable index of one article
#[derive(Debug, Clone)]
pub struct ArticleIndex {
    article_id: ArticleId,
    checkpoints: Vec<Checkpoint>,
    // stamps[c - 1] belongs to counter c
    stamps: Vec<RevisionStamp>,
}

impl ArticleIndex {
    /// Article this index describes
    pub fn article_id(&self) -> ArticleId {
        self.article_id
    }

    /// Number of revisions
    pub fn revision_count(&self) -> RevisionCounter {
        self.stamps.len() as RevisionCounter
    }

    /// Checkpoints in counter order
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Arena index and checkpoint owning `counter`
    pub fn locate(&self, counter: RevisionCounter) -> Result<(usize, &Checkpoint)> {
        if counter == 0 || counter > self.revision_count() {
            return Err(self.missing(counter));
        }
        let position = self.checkpoints.partition_point(|cp| cp.start_counter <= counter);
        // The first checkpoint starts at 1, so position >= 1 here
        let slot = position.checked_sub(1).ok_or(StorageError::MissingCheckpoint(self.article_id))?;
        Ok((slot, &self.checkpoints[slot]))
    }

    /// Counter range `[start, next.start)` owned by the checkpoint at `slot`
    pub fn checkpoint_range(&self, slot: usize) -> Range<RevisionCounter> {
        let Some(checkpoint) = self.checkpoints.get(slot) else {
            return 0..0;
        };
        let end = checkpoint
            .next
            .map_or(self.revision_count() + 1, |next| self.checkpoints[next].start_counter);
        checkpoint.start_counter..end
    }

    /// Index entry of `counter`
    pub fn stamp(&self, counter: RevisionCounter) -> Result<&RevisionStamp> {
        counter
            .checked_sub(1)
            .and_then(|i| self.stamps.get(i as usize))
            .ok_or_else(|| self.missing(counter))
    }

    /// Storage key of `counter`
    pub fn key_of(&self, counter: RevisionCounter) -> Result<StorageKey> {
        self.stamp(counter).map(|stamp| stamp.key)
    }

    /// Latest revision at or before `timestamp`
    pub fn counter_at(&self, timestamp: DateTime<Utc>) -> Option<RevisionCounter> {
        let position = self.stamps.partition_point(|stamp| stamp.timestamp <= timestamp);
        (position > 0).then_some(position as RevisionCounter)
    }

    /// Revision timestamps in counter order
    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.stamps.iter().map(|stamp| stamp.timestamp)
    }

    fn missing(&self, counter: RevisionCounter) -> Error {
        Error::not_found(format!(
            "article {} revision {} (known revisions 1..={})",
            self.article_id,
            counter,
            self.revision_count()
        ))
    }
}

/// Incrementally assembles an `ArticleIndex` as records are written
#[derive(Debug)]
pub struct ArticleIndexBuilder {
    article_id: ArticleId,
    checkpoints: Vec<Checkpoint>,
    stamps: Vec<RevisionStamp>,
}

impl ArticleIndexBuilder {
    /// Start an empty index for `article_id`
    pub fn new(article_id: ArticleId) -> Self {
        Self {
            article_id,
            checkpoints: Vec::new(),
            stamps: Vec::new(),
        }
    }

    /// Record a stored revision.
    ///
    /// Counters must arrive gapless from 1 and the first revision must be a
    /// checkpoint.
    pub fn push(&mut self, header: &RevisionHeader, key: StorageKey, is_checkpoint: bool) -> Result<()> {
        let expected = self.stamps.len() as RevisionCounter + 1;
        if header.article_id != self.article_id || header.revision_counter != expected {
            return Err(StorageError::SequenceError {
                article_id: self.article_id,
                expected,
                actual: header.revision_counter,
            }
            .into());
        }
        if self.stamps.is_empty() && !is_checkpoint {
            return Err(StorageError::MissingCheckpoint(self.article_id).into());
        }

        if is_checkpoint {
            let slot = self.checkpoints.len();
            let prev = slot.checked_sub(1);
            if let Some(prev) = prev {
                self.checkpoints[prev].next = Some(slot);
            }
            self.checkpoints.push(Checkpoint {
                start_counter: header.revision_counter,
                key,
                prev,
                next: None,
            });
        }

        self.stamps.push(RevisionStamp {
            revision_id: header.revision_id,
            timestamp: header.timestamp,
            key,
        });
        Ok(())
    }

    /// Revisions recorded so far
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// No revision recorded yet
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Finish the index
    pub fn build(self) -> Result<ArticleIndex> {
        if self.checkpoints.is_empty() {
            return Err(StorageError::MissingCheckpoint(self.article_id).into());
        }
        Ok(ArticleIndex {
            article_id: self.article_id,
            checkpoints: self.checkpoints,
            stamps: self.stamps,
        })
    }
}

/// Published article indexes plus a global revision id lookup
#[derive(Debug, Default)]
pub struct RevisionIndex {
    articles: DashMap<ArticleId, Arc<ArticleIndex>>,
    revision_ids: DashMap<RevisionId, (ArticleId, RevisionCounter)>,
}

impl RevisionIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an article readable, replacing any previous index for it
    pub fn publish(&self, index: ArticleIndex) {
        let article_id = index.article_id;
        if let Some((_, previous)) = self.articles.remove(&article_id) {
            self.forget_revisions(&previous);
        }
        for (i, stamp) in index.stamps.iter().enumerate() {
            self.revision_ids.insert(stamp.revision_id, (article_id, i as RevisionCounter + 1));
        }
        self.articles.insert(article_id, Arc::new(index));
    }

    /// Index of `article_id`, if published
    pub fn article(&self, article_id: ArticleId) -> Option<Arc<ArticleIndex>> {
        self.articles.get(&article_id).map(|entry| entry.value().clone())
    }

    /// Article and counter of a revision id
    pub fn locate_revision(&self, revision_id: RevisionId) -> Option<(ArticleId, RevisionCounter)> {
        self.revision_ids.get(&revision_id).map(|entry| *entry.value())
    }

    /// Withdraw an article
    pub fn remove(&self, article_id: ArticleId) -> Option<Arc<ArticleIndex>> {
        let (_, index) = self.articles.remove(&article_id)?;
        self.forget_revisions(&index);
        Some(index)
    }

    /// Number of published articles
    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    /// Published article ids, unordered
    pub fn article_ids(&self) -> Vec<ArticleId> {
        self.articles.iter().map(|entry| *entry.key()).collect()
    }

    fn forget_revisions(&self, index: &ArticleIndex) {
        for stamp in &index.stamps {
            self.revision_ids.remove(&stamp.revision_id);
        }
    }
}
