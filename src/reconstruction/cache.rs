//! Per-article cache of reconstructed revisions
//!
//! Entries are keyed by revision counter. A chronological scan announces
//! the counter it expects next; while the smallest cached counter equals
//! that expectation the entry is handed out by value and dropped
//! (at most once per counter). Lookups out of chronological order clone
//! entries and leave them cached.

use crate::core::types::{Revision, RevisionCounter};
use std::collections::BTreeMap;

/// Reconstruction cache of one article
#[derive(Debug)]
pub struct RevisionCache {
    entries: BTreeMap<RevisionCounter, Revision>,
    bytes: usize,
    byte_limit: usize,
    next_expected: Option<RevisionCounter>,
}

impl RevisionCache {
    /// Create an empty cache holding at most `byte_limit` bytes of text
    pub fn new(byte_limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            bytes: 0,
            byte_limit,
            next_expected: None,
        }
    }

    /// Pop `counter` if a chronological scan expects it and it is the top entry
    pub fn take_next(&mut self, counter: RevisionCounter) -> Option<Revision> {
        if self.next_expected != Some(counter) {
            return None;
        }
        let entry = self.entries.first_entry().filter(|entry| *entry.key() == counter)?;
        let revision = entry.remove();
        self.bytes -= revision.byte_size();
        self.next_expected = Some(counter + 1);
        Some(revision)
    }

    /// Cached revision at `counter`, left in place
    pub fn get(&self, counter: RevisionCounter) -> Option<&Revision> {
        self.entries.get(&counter)
    }

    /// Highest cached revision with counter in `lo..=hi`
    pub fn nearest(&self, lo: RevisionCounter, hi: RevisionCounter) -> Option<&Revision> {
        if lo > hi {
            return None;
        }
        self.entries.range(lo..=hi).next_back().map(|(_, revision)| revision)
    }

    /// Cache a reconstructed revision, evicting others if over budget
    pub fn insert(&mut self, revision: Revision) {
        let counter = revision.revision_counter;
        self.bytes += revision.byte_size();
        if let Some(old) = self.entries.insert(counter, revision) {
            self.bytes -= old.byte_size();
        }
        self.evict(counter);
    }

    /// Cache the revisions of a replayed path and return the one at `counter`.
    ///
    /// When a scan expects `counter`, the scan consumes it and moves on;
    /// revisions past it are kept for the scan while they fit the budget.
    /// Any other lookup ends the scan and keeps the whole path.
    pub fn store_path(&mut self, path: Vec<Revision>, counter: RevisionCounter) -> Option<Revision> {
        let mut target = None;
        if self.next_expected == Some(counter) {
            self.next_expected = Some(counter + 1);
            for revision in path {
                if revision.revision_counter == counter {
                    target = Some(revision);
                } else if revision.revision_counter > counter {
                    if !self.has_room(revision.byte_size()) {
                        break;
                    }
                    self.insert(revision);
                }
            }
            return target;
        }

        self.next_expected = None;
        for revision in path {
            if revision.revision_counter == counter {
                target = Some(revision.clone());
            }
            self.insert(revision);
        }
        target
    }

    /// Whether `bytes` more fit without evicting anything
    pub fn has_room(&self, bytes: usize) -> bool {
        self.bytes + bytes <= self.byte_limit
    }

    /// Start a chronological scan at `counter`, dropping everything before it
    pub fn begin_scan(&mut self, counter: RevisionCounter) {
        let kept = self.entries.split_off(&counter);
        self.entries = kept;
        self.bytes = self.entries.values().map(Revision::byte_size).sum();
        self.next_expected = Some(counter);
    }

    /// Counter a chronological scan expects next
    pub fn next_expected(&self) -> Option<RevisionCounter> {
        self.next_expected
    }

    /// Bytes of text currently cached
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of cached revisions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and any scan in progress
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        self.next_expected = None;
    }

    // During a scan the entries furthest ahead go first; otherwise the oldest.
    // The entry just inserted stays even if it alone exceeds the budget.
    fn evict(&mut self, keep: RevisionCounter) {
        let scanning = self.next_expected.is_some();
        while self.bytes > self.byte_limit {
            let victim = if scanning {
                self.entries.keys().rev().find(|&&counter| counter != keep)
            } else {
                self.entries.keys().find(|&&counter| counter != keep)
            }
            .copied();

            let Some(victim) = victim else { break };
            if let Some(revision) = self.entries.remove(&victim) {
                self.bytes -= revision.byte_size();
            }
        }
    }
}
