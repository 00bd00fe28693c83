//! Error types and handling for the revision store
//!
//! This module defines all error types used throughout the system. Every
//! error carries enough context (article, revision counter, operation index)
//! to be diagnosed without a retry.

use crate::core::types::{ArticleId, RevisionCounter};
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the revision store
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A diff could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A byte stream could not be turned back into a diff
    #[error("Decoding error: {0}")]
    Decoding(#[from] DecodingError),

    /// A diff is structurally invalid for the buffer it is replayed against
    #[error("Corrupt diff: {0}")]
    CorruptDiff(#[from] DiffError),

    /// Replaying stored deltas failed; the store is considered corrupt
    #[error("Reconstruction of article {article_id} revision {revision_counter} failed: {reason}")]
    Reconstruction {
        /// Article being reconstructed
        article_id: ArticleId,
        /// Revision counter that was requested
        revision_counter: RevisionCounter,
        /// What went wrong
        reason: String,
    },

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Requested article or revision does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A blocking wait made no progress within the configured budget
    #[error("Stage '{stage}' stalled after {waits} consecutive empty waits")]
    Timeout {
        /// Stage or operation that stalled
        stage: String,
        /// Number of consecutive empty waits observed
        waits: u32,
    },

    /// Internal contract violations
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Fields of the adaptive-width wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Operation start position (S)
    Start,
    /// Operation length (E)
    Length,
    /// Cut/paste block identifier (B)
    BlockId,
    /// Encoded text length in bytes (L)
    TextLength,
    /// Number of operations in the diff (N)
    PartCount,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::Start => "start",
            Field::Length => "length",
            Field::BlockId => "block id",
            Field::TextLength => "text length",
            Field::PartCount => "part count",
        };
        f.write_str(name)
    }
}

/// Errors raised while serializing a diff
#[derive(Error, Debug)]
pub enum EncodingError {
    /// A field value needs more bits than the wire format allows
    #[error("{field} value {value} exceeds the 31-bit field limit (operation {operation})")]
    FieldTooWide {
        /// Offending field
        field: Field,
        /// Value that could not be represented
        value: u64,
        /// Index of the operation in the diff
        operation: usize,
    },

    /// Text contains a character the configured charset cannot represent
    #[error("Character {ch:?} is not representable in {charset} (operation {operation})")]
    Unrepresentable {
        /// Offending character
        ch: char,
        /// Charset name
        charset: &'static str,
        /// Index of the operation in the diff
        operation: usize,
    },

    /// General-purpose compression failed
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// Errors raised while deserializing a diff
#[derive(Error, Debug)]
pub enum DecodingError {
    /// The input is empty or too short to hold a header
    #[error("Missing codec header")]
    MissingHeader,

    /// The stream ended inside an operation
    #[error("Unexpected end of stream while reading operation {operation}")]
    UnexpectedEnd {
        /// Index of the operation being read (0 is the header)
        operation: usize,
    },

    /// An operation code outside the defined opcode space
    #[error("Invalid opcode {code} at operation {operation}")]
    InvalidOpcode {
        /// Code that was read
        code: u8,
        /// Index of the operation being read
        operation: usize,
    },

    /// Padding bits after an operation were not zero
    #[error("Non-zero padding after operation {operation}")]
    InvalidPadding {
        /// Index of the operation just read
        operation: usize,
    },

    /// A read was attempted with a width beyond the wire limit
    #[error("Field width {width} exceeds the 31-bit limit")]
    WidthOutOfRange {
        /// Requested width
        width: u32,
    },

    /// Text bytes are not valid in the configured charset
    #[error("Invalid {charset} text in operation {operation}")]
    InvalidText {
        /// Charset name
        charset: &'static str,
        /// Index of the operation being read
        operation: usize,
    },

    /// Bytes left over after the declared number of operations
    #[error("{bytes} trailing bytes after operation {operation}")]
    TrailingBytes {
        /// Last operation declared by the header
        operation: usize,
        /// Bytes not consumed
        bytes: usize,
    },

    /// Unknown compression marker byte
    #[error("Unknown compression marker {0:#04x}")]
    UnknownMarker(u8),

    /// The compressed payload could not be inflated
    #[error("Decompression failed: {0}")]
    Decompression(#[from] std::io::Error),
}

/// Replay-time structural violations (CorruptDiffError)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// An operation addresses characters outside the current buffer
    #[error("Operation {operation} addresses [{start}, {end}) but buffer holds {buffer_len} chars")]
    OutOfBounds {
        /// Index of the operation in the diff
        operation: usize,
        /// Start position
        start: usize,
        /// End position (exclusive)
        end: usize,
        /// Buffer length at that point
        buffer_len: usize,
    },

    /// A paste references a block that has no preceding unconsumed cut
    #[error("Operation {operation} pastes block {block_id} which was never cut")]
    DanglingPaste {
        /// Index of the operation in the diff
        operation: usize,
        /// Referenced block id
        block_id: u32,
    },

    /// The same block id was cut twice without being pasted in between
    #[error("Operation {operation} cuts block {block_id} which is already held")]
    DuplicateCut {
        /// Index of the operation in the diff
        operation: usize,
        /// Referenced block id
        block_id: u32,
    },

    /// Cut blocks left unpasted at the end of the replay
    #[error("Blocks {0:?} were cut but never pasted")]
    UnconsumedCut(Vec<u32>),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Records were written out of order for an article
    #[error("Article {article_id}: expected revision counter {expected}, got {actual}")]
    SequenceError {
        /// Article being written
        article_id: ArticleId,
        /// Expected revision counter
        expected: RevisionCounter,
        /// Revision counter received
        actual: RevisionCounter,
    },

    /// The first record of an article's index is not a full revision
    #[error("Article {0}: first indexed revision is not a full revision")]
    MissingCheckpoint(ArticleId),

    /// Range query with inverted bounds
    #[error("Invalid key range ({after}, {through}]")]
    InvalidRange {
        /// Exclusive lower key
        after: u64,
        /// Inclusive upper key
        through: u64,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a timeout error for a stalled stage
    pub fn timeout(stage: impl Into<String>, waits: u32) -> Self {
        Self::Timeout {
            stage: stage.into(),
            waits,
        }
    }

    /// Create a reconstruction error
    pub fn reconstruction(
        article_id: ArticleId,
        revision_counter: RevisionCounter,
        reason: impl Into<String>,
    ) -> Self {
        Self::Reconstruction {
            article_id,
            revision_counter,
            reason: reason.into(),
        }
    }

    /// Check if this error indicates corrupted stored data
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Reconstruction { .. } | Error::CorruptDiff(_) | Error::Internal(_)
        )
    }

    /// Check if the failed operation may succeed when attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Io(_))
    }

    /// Check if this is a timeout raised by a stall detector
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruction_error_context() {
        let err = Error::reconstruction(7, 42, "counter mismatch");
        let msg = err.to_string();
        assert!(msg.contains("article 7"));
        assert!(msg.contains("revision 42"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_codec_errors_convert() {
        let err: Error = DecodingError::UnexpectedEnd { operation: 3 }.into();
        assert!(matches!(err, Error::Decoding(DecodingError::UnexpectedEnd { operation: 3 })));
        assert!(!err.is_fatal());

        let err: Error = EncodingError::FieldTooWide {
            field: Field::Start,
            value: 1 << 31,
            operation: 0,
        }
        .into();
        assert!(err.to_string().contains("start value 2147483648"));
    }

    #[test]
    fn test_timeout_classification() {
        let err = Error::timeout("diff-worker-0", 10);
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}
