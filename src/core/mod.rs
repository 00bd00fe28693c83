//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the revision
//! store: identifiers and revision records, error handling, configuration,
//! and bounded waiting.

pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use backoff::{Backoff, WaitPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use types::{ArticleId, Revision, RevisionCounter, RevisionHeader, RevisionId, StorageKey, TextLoader};
