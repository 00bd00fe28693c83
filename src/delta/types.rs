//! Delta-related type definitions

use serde::{Deserialize, Serialize};

/// One operation of a diff.
///
/// `start` and `length` are measured in characters against the evolving
/// output buffer, i.e. they already reflect every earlier operation of the
/// same diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffPart {
    /// Replace the whole buffer with `text`
    FullRevision {
        /// Complete revision text
        text: String,
    },
    /// Insert `text` at `start`
    Insert {
        /// Insert position
        start: usize,
        /// Inserted text
        text: String,
    },
    /// Remove `[start, start + length)`
    Delete {
        /// First removed character
        start: usize,
        /// Number of removed characters
        length: usize,
    },
    /// Remove `[start, start + length)` and insert `text` at `start`
    Replace {
        /// First replaced character
        start: usize,
        /// Number of replaced characters
        length: usize,
        /// Replacement text
        text: String,
    },
    /// Remove `[start, start + length)` and hold it under `block_id`
    Cut {
        /// First cut character
        start: usize,
        /// Number of cut characters
        length: usize,
        /// Within-diff handle of the held block
        block_id: u32,
    },
    /// Insert the block held under `block_id` at `start`
    Paste {
        /// Paste position
        start: usize,
        /// Within-diff handle of a previously cut block
        block_id: u32,
    },
}

/// Wire operation codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Codec header carrying the four field widths
    Header = 0,
    /// Full revision text
    FullRevision = 1,
    /// Insert
    Insert = 2,
    /// Delete
    Delete = 3,
    /// Replace
    Replace = 4,
    /// Cut
    Cut = 5,
    /// Paste
    Paste = 6,
}

impl OpCode {
    /// Parse a 3-bit code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OpCode::Header),
            1 => Some(OpCode::FullRevision),
            2 => Some(OpCode::Insert),
            3 => Some(OpCode::Delete),
            4 => Some(OpCode::Replace),
            5 => Some(OpCode::Cut),
            6 => Some(OpCode::Paste),
            _ => None,
        }
    }
}

impl DiffPart {
    /// Wire opcode of this part
    pub fn opcode(&self) -> OpCode {
        match self {
            DiffPart::FullRevision { .. } => OpCode::FullRevision,
            DiffPart::Insert { .. } => OpCode::Insert,
            DiffPart::Delete { .. } => OpCode::Delete,
            DiffPart::Replace { .. } => OpCode::Replace,
            DiffPart::Cut { .. } => OpCode::Cut,
            DiffPart::Paste { .. } => OpCode::Paste,
        }
    }

    /// Start position, if the part has one
    pub fn start(&self) -> Option<usize> {
        match self {
            DiffPart::FullRevision { .. } => None,
            DiffPart::Insert { start, .. }
            | DiffPart::Delete { start, .. }
            | DiffPart::Replace { start, .. }
            | DiffPart::Cut { start, .. }
            | DiffPart::Paste { start, .. } => Some(*start),
        }
    }

    /// Length, if the part has one
    pub fn length(&self) -> Option<usize> {
        match self {
            DiffPart::Delete { length, .. }
            | DiffPart::Replace { length, .. }
            | DiffPart::Cut { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Block id, if the part has one
    pub fn block_id(&self) -> Option<u32> {
        match self {
            DiffPart::Cut { block_id, .. } | DiffPart::Paste { block_id, .. } => Some(*block_id),
            _ => None,
        }
    }

    /// Text payload, if the part has one
    pub fn text(&self) -> Option<&str> {
        match self {
            DiffPart::FullRevision { text }
            | DiffPart::Insert { text, .. }
            | DiffPart::Replace { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Adaptive field widths chosen for one encoded diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodecData {
    /// Bits per start value (S)
    pub start_width: u32,
    /// Bits per length value (E)
    pub length_width: u32,
    /// Bits per block id (B)
    pub block_width: u32,
    /// Bits per text byte length (L)
    pub text_width: u32,
}

/// Ordered transformation from one revision to the next, or a full revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    /// Operations in replay order
    pub parts: Vec<DiffPart>,
    /// Widths used on the wire, known after encoding or decoding
    pub codec: Option<CodecData>,
}

impl PartialEq for Diff {
    /// Diffs are equal when their operations are; codec metadata is derived.
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Diff {}

impl Diff {
    /// Create an empty diff (identical revisions)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a diff from parts
    pub fn from_parts(parts: Vec<DiffPart>) -> Self {
        Self { parts, codec: None }
    }

    /// Create a checkpoint diff holding the complete text
    pub fn full_revision(text: impl Into<String>) -> Self {
        Self::from_parts(vec![DiffPart::FullRevision { text: text.into() }])
    }

    /// Append a part
    pub fn push(&mut self, part: DiffPart) {
        self.parts.push(part);
    }

    /// Whether replay ignores the base text
    pub fn is_full_revision(&self) -> bool {
        matches!(self.parts.first(), Some(DiffPart::FullRevision { .. }))
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// No operations at all
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Rough size of the diff in bytes, used for task accounting
    pub fn byte_size_estimate(&self) -> usize {
        self.parts
            .iter()
            .map(|part| 8 + part.text().map_or(0, str::len))
            .sum()
    }
}
