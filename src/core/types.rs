//! Core revision types
//!
//! Identifiers, the `Revision` record, and the metadata header stored next
//! to every encoded diff.

use crate::core::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Article (page) identifier
pub type ArticleId = u64;

/// Globally unique revision identifier
pub type RevisionId = u64;

/// 1-based sequential position of a revision within its article's history
pub type RevisionCounter = u32;

/// Position of a record in an article's append-only delta store.
///
/// Keys are dense and 1-based per article: the n-th record written for an
/// article has key n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct StorageKey(pub u64);

impl StorageKey {
    /// Key `n` positions after this one
    pub fn offset(self, n: u64) -> StorageKey {
        StorageKey(self.0 + n)
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Author of a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contributor {
    /// Registered user
    User {
        /// User id
        id: u64,
        /// User name
        name: String,
    },
    /// Anonymous edit identified by address
    Anonymous {
        /// IP address or host
        address: String,
    },
    /// Contributor information was removed
    Unknown,
}

impl Default for Contributor {
    fn default() -> Self {
        Contributor::Unknown
    }
}

/// One historical version of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Article this revision belongs to
    pub article_id: ArticleId,
    /// Globally unique revision id
    pub revision_id: RevisionId,
    /// Position within the article's history (1-based, gapless)
    pub revision_counter: RevisionCounter,
    /// Key of the stored record, once written
    #[serde(default)]
    pub primary_key: Option<StorageKey>,
    /// Time the revision was saved
    pub timestamp: DateTime<Utc>,
    /// Revision text; absent until materialized
    #[serde(default)]
    pub text: Option<String>,
    /// Who made the edit
    #[serde(default)]
    pub contributor: Contributor,
    /// Minor edit flag
    #[serde(default)]
    pub minor: bool,
    /// Edit summary
    #[serde(default)]
    pub comment: Option<String>,
}

/// Capability that materializes revision text on demand.
///
/// Implemented by the reconstruction engine; a `Revision` never holds a
/// reference to the object that produced it.
pub trait TextLoader {
    /// Load the full text of `revision_counter` within `article_id`
    fn load_text(&mut self, article_id: ArticleId, revision_counter: RevisionCounter) -> Result<String>;
}

impl Revision {
    /// Create a revision with text
    pub fn new(
        article_id: ArticleId,
        revision_id: RevisionId,
        revision_counter: RevisionCounter,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            article_id,
            revision_id,
            revision_counter,
            primary_key: None,
            timestamp,
            text: Some(text.into()),
            contributor: Contributor::Unknown,
            minor: false,
            comment: None,
        }
    }

    /// Approximate in-memory size used for task and cache accounting
    pub fn byte_size(&self) -> usize {
        self.text.as_ref().map_or(0, String::len) + self.comment.as_ref().map_or(0, String::len)
    }

    /// Text if already materialized
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Materialize the text through `loader` if it is not present yet
    pub fn load_text<L: TextLoader + ?Sized>(&mut self, loader: &mut L) -> Result<&str> {
        if self.text.is_none() {
            let text = loader.load_text(self.article_id, self.revision_counter)?;
            self.text = Some(text);
        }
        Ok(self.text.as_deref().unwrap_or_default())
    }

    /// Metadata header stored alongside this revision's diff
    pub fn header(&self) -> RevisionHeader {
        RevisionHeader {
            article_id: self.article_id,
            revision_id: self.revision_id,
            revision_counter: self.revision_counter,
            timestamp: self.timestamp,
            contributor: self.contributor.clone(),
            minor: self.minor,
            comment: self.comment.clone(),
        }
    }
}

/// Revision metadata persisted next to each encoded diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionHeader {
    /// Article the diff belongs to
    pub article_id: ArticleId,
    /// Revision id of the diff's target revision
    pub revision_id: RevisionId,
    /// Revision counter of the diff's target revision
    pub revision_counter: RevisionCounter,
    /// Timestamp of the target revision
    pub timestamp: DateTime<Utc>,
    /// Author of the target revision
    pub contributor: Contributor,
    /// Minor edit flag
    pub minor: bool,
    /// Edit summary
    pub comment: Option<String>,
}

impl RevisionHeader {
    /// Turn the header back into a revision carrying `text`
    pub fn into_revision(self, primary_key: StorageKey, text: String) -> Revision {
        Revision {
            article_id: self.article_id,
            revision_id: self.revision_id,
            revision_counter: self.revision_counter,
            primary_key: Some(primary_key),
            timestamp: self.timestamp,
            text: Some(text),
            contributor: self.contributor,
            minor: self.minor,
            comment: self.comment,
        }
    }
}
