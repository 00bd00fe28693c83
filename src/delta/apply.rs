//! Deterministic diff replay

use crate::core::error::DiffError;
use crate::delta::types::{Diff, DiffPart};
use std::collections::HashMap;

impl Diff {
    /// Replay this diff against `base` and return the derived text.
    ///
    /// `base` seeds the output buffer; `None` starts from an empty buffer,
    /// which is what a full-revision diff expects.
    pub fn apply(&self, base: Option<&str>) -> Result<String, DiffError> {
        let buffer = base.map(|text| text.chars().collect()).unwrap_or_default();
        let chars = self.apply_chars(buffer)?;
        Ok(chars.into_iter().collect())
    }

    /// Replay this diff against a character buffer, consuming it.
    pub fn apply_chars(&self, mut buffer: Vec<char>) -> Result<Vec<char>, DiffError> {
        let mut held: HashMap<u32, Vec<char>> = HashMap::new();

        for (operation, part) in self.parts.iter().enumerate() {
            match part {
                DiffPart::FullRevision { text } => {
                    buffer.clear();
                    buffer.extend(text.chars());
                }
                DiffPart::Insert { start, text } => {
                    check_bounds(operation, *start, 0, buffer.len())?;
                    buffer.splice(*start..*start, text.chars());
                }
                DiffPart::Delete { start, length } => {
                    check_bounds(operation, *start, *length, buffer.len())?;
                    buffer.drain(*start..*start + *length);
                }
                DiffPart::Replace { start, length, text } => {
                    check_bounds(operation, *start, *length, buffer.len())?;
                    buffer.splice(*start..*start + *length, text.chars());
                }
                DiffPart::Cut { start, length, block_id } => {
                    check_bounds(operation, *start, *length, buffer.len())?;
                    if held.contains_key(block_id) {
                        return Err(DiffError::DuplicateCut {
                            operation,
                            block_id: *block_id,
                        });
                    }
                    let block: Vec<char> = buffer.drain(*start..*start + *length).collect();
                    held.insert(*block_id, block);
                }
                DiffPart::Paste { start, block_id } => {
                    check_bounds(operation, *start, 0, buffer.len())?;
                    let block = held.remove(block_id).ok_or(DiffError::DanglingPaste {
                        operation,
                        block_id: *block_id,
                    })?;
                    buffer.splice(*start..*start, block);
                }
            }
        }

        if !held.is_empty() {
            let mut ids: Vec<u32> = held.into_keys().collect();
            ids.sort_unstable();
            return Err(DiffError::UnconsumedCut(ids));
        }

        Ok(buffer)
    }
}

fn check_bounds(operation: usize, start: usize, length: usize, buffer_len: usize) -> Result<(), DiffError> {
    match start.checked_add(length) {
        Some(end) if end <= buffer_len => Ok(()),
        end => Err(DiffError::OutOfBounds {
            operation,
            start,
            end: end.unwrap_or(usize::MAX),
            buffer_len,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(parts: Vec<DiffPart>) -> Diff {
        Diff::from_parts(parts)
    }

    #[test]
    fn test_full_revision_discards_base() {
        let d = Diff::full_revision("fresh");
        assert_eq!(d.apply(Some("old text")).unwrap(), "fresh");
        assert_eq!(d.apply(None).unwrap(), "fresh");
    }

    #[test]
    fn test_basic_operations() {
        let d = diff(vec![
            DiffPart::Replace { start: 2, length: 3, text: "XYZ".into() },
            DiffPart::Insert { start: 6, text: "Q".into() },
            DiffPart::Delete { start: 0, length: 1 },
        ]);
        assert_eq!(d.apply(Some("abcdef")).unwrap(), "bXYZfQ");
    }

    #[test]
    fn test_cut_and_paste_moves_block() {
        // "one two three" -> "two three one"
        let d = diff(vec![
            DiffPart::Cut { start: 0, length: 4, block_id: 1 },
            DiffPart::Insert { start: 9, text: " ".into() },
            DiffPart::Paste { start: 10, block_id: 1 },
            DiffPart::Delete { start: 13, length: 1 },
        ]);
        assert_eq!(d.apply(Some("one two three")).unwrap(), "two three one");
    }

    #[test]
    fn test_positions_count_characters() {
        let d = diff(vec![DiffPart::Replace { start: 1, length: 1, text: "ö".into() }]);
        assert_eq!(d.apply(Some("añb")).unwrap(), "aöb");
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let d = diff(vec![DiffPart::Delete { start: 3, length: 5 }]);
        assert_eq!(
            d.apply(Some("abcdef")).unwrap_err(),
            DiffError::OutOfBounds { operation: 0, start: 3, end: 8, buffer_len: 6 }
        );

        let d = diff(vec![DiffPart::Insert { start: 7, text: "x".into() }]);
        assert!(matches!(d.apply(Some("abc")), Err(DiffError::OutOfBounds { .. })));
    }

    #[test]
    fn test_dangling_paste_rejected() {
        let d = diff(vec![DiffPart::Paste { start: 0, block_id: 4 }]);
        assert_eq!(
            d.apply(Some("abc")).unwrap_err(),
            DiffError::DanglingPaste { operation: 0, block_id: 4 }
        );
    }

    #[test]
    fn test_unconsumed_cut_rejected() {
        let d = diff(vec![
            DiffPart::Cut { start: 0, length: 1, block_id: 2 },
            DiffPart::Cut { start: 0, length: 1, block_id: 1 },
        ]);
        assert_eq!(d.apply(Some("abc")).unwrap_err(), DiffError::UnconsumedCut(vec![1, 2]));
    }

    #[test]
    fn test_paste_consumes_block() {
        let d = diff(vec![
            DiffPart::Cut { start: 0, length: 1, block_id: 0 },
            DiffPart::Paste { start: 2, block_id: 0 },
            DiffPart::Paste { start: 0, block_id: 0 },
        ]);
        assert!(matches!(d.apply(Some("abc")), Err(DiffError::DanglingPaste { operation: 2, .. })));
    }

    #[test]
    fn test_empty_diff_is_identity() {
        assert_eq!(Diff::new().apply(Some("same")).unwrap(), "same");
        assert_eq!(Diff::new().apply(None).unwrap(), "");
    }
}
