//! Reconstruction engine
//!
//! A lookup for revision `R` of article `A` runs through:
//!
//! 1. the chronological fast path of `A`'s cache;
//! 2. locating the checkpoint owning `R`;
//! 3. picking the closest cached revision in `[checkpoint, R]` as base,
//!    or the checkpoint itself;
//! 4. fetching exactly the deltas in `(base key, base key + (R - base)]`;
//! 5. replaying them in order while checking every record's counter.
//!
//! A counter mismatch means the store is corrupt; the lookup fails with a
//! fatal `Reconstruction` error and nothing replayed is cached.

use crate::codec::DiffCodec;
use crate::core::backoff::WaitPolicy;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{ArticleId, Revision, RevisionCounter, RevisionId, StorageKey, TextLoader};
use crate::reconstruction::cache::RevisionCache;
use crate::storage::{ArticleIndex, Checkpoint, DeltaRecord, DeltaStore, RevisionIndex};
use crate::system::metrics::{Metrics, Timer};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Rebuilds historical revisions from stored deltas.
///
/// Caches are per article and owned by the engine; share an engine across
/// threads only behind a lock.
pub struct ReconstructionEngine {
    store: Arc<dyn DeltaStore>,
    index: Arc<RevisionIndex>,
    codec: DiffCodec,
    wait: WaitPolicy,
    cache_byte_limit: usize,
    caches: HashMap<ArticleId, RevisionCache>,
}

impl ReconstructionEngine {
    /// Create an engine reading from `store` through `index`
    pub fn new(store: Arc<dyn DeltaStore>, index: Arc<RevisionIndex>, config: &Config) -> Self {
        Self {
            store,
            index,
            codec: DiffCodec::new(&config.codec),
            wait: WaitPolicy::new(config.reconstruction.wait_interval, config.reconstruction.max_empty_waits),
            cache_byte_limit: config.reconstruction.cache_byte_limit,
            caches: HashMap::new(),
        }
    }

    /// Reconstruct revision `counter` of `article_id`
    pub fn revision(&mut self, article_id: ArticleId, counter: RevisionCounter) -> Result<Revision> {
        let metrics = &Metrics::global().reconstruction;
        let result = self.lookup(article_id, counter);
        match &result {
            Ok(_) => metrics.revisions_reconstructed.inc(),
            Err(e) if e.is_fatal() => {
                metrics.failures.inc();
                error!(article_id, counter, error = %e, "reconstruction failed");
            }
            Err(_) => {}
        }
        result
    }

    /// Reconstruct the revision with a global revision id
    pub fn revision_by_id(&mut self, revision_id: RevisionId) -> Result<Revision> {
        let (article_id, counter) = self
            .index
            .locate_revision(revision_id)
            .ok_or_else(|| Error::not_found(format!("revision id {}", revision_id)))?;
        self.revision(article_id, counter)
    }

    /// Reconstruct the latest revision of `article_id` at or before `timestamp`
    pub fn revision_at(&mut self, article_id: ArticleId, timestamp: DateTime<Utc>) -> Result<Revision> {
        let counter = self.article_index(article_id)?.counter_at(timestamp).ok_or_else(|| {
            Error::not_found(format!("article {} has no revision at or before {}", article_id, timestamp))
        })?;
        self.revision(article_id, counter)
    }

    /// Replay the checkpoint block holding `counter` into the cache and
    /// start a chronological scan at `counter`.
    ///
    /// Returns the counters the block covers from `counter` on.
    pub fn prefetch(&mut self, article_id: ArticleId, counter: RevisionCounter) -> Result<Range<RevisionCounter>> {
        let index = self.article_index(article_id)?;
        let (slot, checkpoint) = index.locate(counter)?;
        let checkpoint = *checkpoint;
        let block = index.checkpoint_range(slot);

        let limit = self.cache_byte_limit;
        let cache = self.caches.entry(article_id).or_insert_with(|| RevisionCache::new(limit));
        let base = cache.nearest(block.start, counter.saturating_sub(1)).cloned();
        cache.begin_scan(counter);

        let last = block.end - 1;
        let path = self.replay(article_id, &checkpoint, base, last, counter)?;

        let cache = self.cache_mut(article_id);
        for revision in path.into_iter().filter(|r| r.revision_counter >= counter) {
            if !cache.has_room(revision.byte_size()) {
                debug!(article_id, counter = revision.revision_counter, "prefetch stopped at cache budget");
                break;
            }
            cache.insert(revision);
        }
        Ok(counter..block.end)
    }

    /// Number of revisions of `article_id`
    pub fn revision_count(&self, article_id: ArticleId) -> Result<RevisionCounter> {
        Ok(self.article_index(article_id)?.revision_count())
    }

    /// Revision timestamps of `article_id` in counter order
    pub fn timestamps(&self, article_id: ArticleId) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.article_index(article_id)?.timestamps().collect())
    }

    /// Timestamp of the first revision
    pub fn first_appearance(&self, article_id: ArticleId) -> Result<DateTime<Utc>> {
        Ok(self.article_index(article_id)?.stamp(1)?.timestamp)
    }

    /// Timestamp of the latest revision
    pub fn last_appearance(&self, article_id: ArticleId) -> Result<DateTime<Utc>> {
        let index = self.article_index(article_id)?;
        Ok(index.stamp(index.revision_count())?.timestamp)
    }

    /// Drop the cache of one article, or of every article
    pub fn clear_cache(&mut self, article_id: Option<ArticleId>) {
        match article_id {
            Some(article_id) => {
                self.caches.remove(&article_id);
            }
            None => self.caches.clear(),
        }
    }

    /// Cache of `article_id`, if one exists
    pub fn cache(&self, article_id: ArticleId) -> Option<&RevisionCache> {
        self.caches.get(&article_id)
    }

    fn lookup(&mut self, article_id: ArticleId, counter: RevisionCounter) -> Result<Revision> {
        let metrics = &Metrics::global().reconstruction;

        if let Some(revision) = self.caches.get_mut(&article_id).and_then(|cache| cache.take_next(counter)) {
            metrics.cache_hits.inc();
            trace!(article_id, counter, "chronological cache hit");
            return Ok(revision);
        }

        let index = self.article_index(article_id)?;
        let (slot, checkpoint) = index.locate(counter)?;
        let checkpoint = *checkpoint;
        let block = index.checkpoint_range(slot);

        let limit = self.cache_byte_limit;
        let cache = self.caches.entry(article_id).or_insert_with(|| RevisionCache::new(limit));
        if let Some(revision) = cache.get(counter) {
            metrics.cache_hits.inc();
            return Ok(revision.clone());
        }
        metrics.cache_misses.inc();
        let base = cache.nearest(block.start, counter).cloned();
        // A scan that outran its prefetch refills from here to the block end
        let through = if cache.next_expected() == Some(counter) {
            block.end - 1
        } else {
            counter
        };

        let path = self.replay(article_id, &checkpoint, base, through, counter)?;
        self.cache_mut(article_id)
            .store_path(path, counter)
            .ok_or_else(|| Error::reconstruction(article_id, counter, "replay produced no revision"))
    }

    /// Replay from `base` (or the checkpoint) through counter `through`.
    ///
    /// `target` is the counter the caller asked for, reported in errors.
    fn replay(
        &self,
        article_id: ArticleId,
        checkpoint: &Checkpoint,
        base: Option<Revision>,
        through: RevisionCounter,
        target: RevisionCounter,
    ) -> Result<Vec<Revision>> {
        let (after, mut expected, mut buffer) = match base {
            Some(base) => {
                let key = base.primary_key.ok_or_else(|| {
                    Error::reconstruction(article_id, target, "cached base revision has no storage key")
                })?;
                let text: Vec<char> = base.text().unwrap_or_default().chars().collect();
                (key, base.revision_counter + 1, text)
            }
            None => (StorageKey(checkpoint.key.0.saturating_sub(1)), checkpoint.start_counter, Vec::new()),
        };
        if expected > through {
            return Ok(Vec::new());
        }
        let from_checkpoint = expected == checkpoint.start_counter;
        let through_key = after.offset(u64::from(through - expected + 1));

        let records = self.fetch(article_id, after, through_key)?;
        let metrics = &Metrics::global().reconstruction;
        let timer = Timer::start(&metrics.replay_duration);
        let mut path = Vec::with_capacity(records.len());

        for record in records {
            let header = &record.header;
            if header.article_id != article_id || header.revision_counter != expected {
                return Err(Error::reconstruction(
                    article_id,
                    target,
                    format!(
                        "record {} carries article {} revision {}, expected revision {}",
                        record.key, header.article_id, header.revision_counter, expected
                    ),
                ));
            }

            let diff = self.codec.decode(&record.payload).map_err(|e| {
                Error::reconstruction(article_id, target, format!("decoding revision {}: {}", expected, e))
            })?;
            if from_checkpoint && path.is_empty() && !diff.is_full_revision() {
                return Err(Error::reconstruction(
                    article_id,
                    target,
                    format!("checkpoint revision {} is not a full revision", expected),
                ));
            }
            buffer = diff.apply_chars(buffer).map_err(|e| {
                Error::reconstruction(article_id, target, format!("replaying revision {}: {}", expected, e))
            })?;
            metrics.deltas_replayed.inc();

            let DeltaRecord { key, header, .. } = record;
            path.push(header.into_revision(key, buffer.iter().collect()));
            expected += 1;
        }

        timer.finish();
        Ok(path)
    }

    /// Fetch `(after, through]`, waiting for records not written yet
    fn fetch(&self, article_id: ArticleId, after: StorageKey, through: StorageKey) -> Result<Vec<DeltaRecord>> {
        let wanted = (through.0 - after.0) as usize;
        let mut backoff = self.wait.backoff(format!("fetch article {} {}..{}", article_id, after, through));
        loop {
            let records = self.store.get_range(article_id, after, through)?;
            if records.len() >= wanted {
                return Ok(records);
            }
            trace!(article_id, have = records.len(), wanted, "delta range incomplete, waiting");
            backoff.wait()?;
        }
    }

    fn article_index(&self, article_id: ArticleId) -> Result<Arc<ArticleIndex>> {
        self.index
            .article(article_id)
            .ok_or_else(|| Error::not_found(format!("article {}", article_id)))
    }

    fn cache_mut(&mut self, article_id: ArticleId) -> &mut RevisionCache {
        let limit = self.cache_byte_limit;
        self.caches.entry(article_id).or_insert_with(|| RevisionCache::new(limit))
    }
}

impl TextLoader for ReconstructionEngine {
    fn load_text(&mut self, article_id: ArticleId, revision_counter: RevisionCounter) -> Result<String> {
        self.revision(article_id, revision_counter)?
            .text
            .ok_or_else(|| Error::reconstruction(article_id, revision_counter, "reconstructed revision has no text"))
    }
}
