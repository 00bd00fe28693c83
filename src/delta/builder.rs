//! Delta builder: turns matched block queues into a diff
//!
//! Both queues are consumed in lock-step. The output cursor tracks the
//! position in the evolving buffer, which at every step holds the finished
//! output followed by the unconsumed remainder of revision A.

use crate::core::error::{Error, Result};
use crate::delta::matcher::{BlockMatcher, BlockTag, GreedyBlockMatcher, MatchedBlock};
use crate::delta::types::{Diff, DiffPart};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Builds move-aware diffs between consecutive revisions
#[derive(Clone)]
pub struct DeltaBuilder {
    matcher: Arc<dyn BlockMatcher>,
}

impl DeltaBuilder {
    /// Create a builder on top of a block matcher
    pub fn new(matcher: Arc<dyn BlockMatcher>) -> Self {
        Self { matcher }
    }

    /// Create a builder using the greedy matcher
    pub fn with_minimum_match_length(minimum_match_length: usize) -> Self {
        Self::new(Arc::new(GreedyBlockMatcher::new(minimum_match_length)))
    }

    /// Match and build the diff turning `rev_a` into `rev_b`
    pub fn diff(&self, rev_a: &[char], rev_b: &[char]) -> Result<Diff> {
        let (blocks_a, blocks_b) = self.matcher.match_blocks(rev_a, rev_b);
        Self::build(rev_a, rev_b, blocks_a, blocks_b)
    }

    /// Synthesize the operation list from matched block queues.
    ///
    /// Fails with `Error::Internal` when the queues violate the block matcher
    /// contract; such a failure is fatal and must not be retried.
    pub fn build(
        rev_a: &[char],
        rev_b: &[char],
        mut blocks_a: VecDeque<MatchedBlock>,
        mut blocks_b: VecDeque<MatchedBlock>,
    ) -> Result<Diff> {
        let mut diff = Diff::new();
        let mut cursor = 0usize;
        // Cut block id -> length, waiting for its paste
        let mut held: HashMap<u32, usize> = HashMap::new();

        loop {
            let (a, b) = (blocks_a.front().copied(), blocks_b.front().copied());

            match (a, b) {
                (None, None) => break,

                // 1. Unchanged common text
                (Some(a), Some(b)) if !a.is_gap() && a.tag == b.tag => {
                    cursor += a.len;
                    blocks_a.pop_front();
                    blocks_b.pop_front();
                }

                // 2. Both sides changed here
                (Some(a), Some(b)) if a.is_gap() && b.is_gap() => {
                    let text = slice(rev_b, &b)?;
                    diff.push(DiffPart::Replace { start: cursor, length: a.len, text });
                    cursor += b.len;
                    blocks_a.pop_front();
                    blocks_b.pop_front();
                }

                // 3. Text only in A
                (Some(a), _) if a.is_gap() => {
                    diff.push(DiffPart::Delete { start: cursor, length: a.len });
                    blocks_a.pop_front();
                }

                // 4. Text only in B
                (_, Some(b)) if b.is_gap() => {
                    let text = slice(rev_b, &b)?;
                    diff.push(DiffPart::Insert { start: cursor, text });
                    cursor += b.len;
                    blocks_b.pop_front();
                }

                // 5. Relocation: paste what was cut, otherwise cut A's block
                (a, Some(b)) => {
                    let BlockTag::Matched(id) = b.tag else {
                        return Err(contract_violation("gap block reached relocation handling"));
                    };
                    if held.remove(&id).is_some() {
                        diff.push(DiffPart::Paste { start: cursor, block_id: id });
                        cursor += b.len;
                        blocks_b.pop_front();
                    } else if let Some(a) = a {
                        let BlockTag::Matched(cut_id) = a.tag else {
                            return Err(contract_violation("gap block reached relocation handling"));
                        };
                        slice(rev_a, &a)?;
                        if held.insert(cut_id, a.len).is_some() {
                            return Err(contract_violation(&format!("block {} cut twice", cut_id)));
                        }
                        diff.push(DiffPart::Cut { start: cursor, length: a.len, block_id: cut_id });
                        blocks_a.pop_front();
                    } else {
                        return Err(contract_violation(&format!(
                            "block {} of revision B was never seen in revision A",
                            id
                        )));
                    }
                }

                // A still holds matched text that B no longer references
                (Some(a), None) => {
                    return Err(contract_violation(&format!(
                        "matched block at {} of revision A has no counterpart left in revision B",
                        a.start
                    )));
                }
            }
        }

        if !held.is_empty() {
            return Err(contract_violation("cut blocks were never pasted"));
        }

        Ok(diff)
    }
}

fn slice(text: &[char], block: &MatchedBlock) -> Result<String> {
    text.get(block.range())
        .map(|chars| chars.iter().collect())
        .ok_or_else(|| contract_violation(&format!("block {:?} exceeds revision length {}", block, text.len())))
}

fn contract_violation(detail: &str) -> Error {
    Error::internal(format!("block matcher contract violated: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn round_trip(builder: &DeltaBuilder, a: &str, b: &str) -> Diff {
        let diff = builder.diff(&chars(a), &chars(b)).unwrap();
        assert_eq!(diff.apply(Some(a)).unwrap(), b, "diff {:?}", diff.parts);
        diff
    }

    #[test]
    fn test_concrete_revision_chain() {
        let builder = DeltaBuilder::with_minimum_match_length(12);

        let first = round_trip(&builder, "abcdef", "abXYZf");
        assert_eq!(
            first.parts,
            vec![DiffPart::Replace { start: 2, length: 3, text: "XYZ".into() }]
        );

        let second = round_trip(&builder, "abXYZf", "abXYZfQ");
        assert_eq!(second.parts, vec![DiffPart::Insert { start: 6, text: "Q".into() }]);

        let text = first.apply(Some("abcdef")).unwrap();
        assert_eq!(second.apply(Some(&text)).unwrap(), "abXYZfQ");
    }

    #[test]
    fn test_identical_and_empty() {
        let builder = DeltaBuilder::with_minimum_match_length(4);
        assert!(round_trip(&builder, "same text", "same text").is_empty());
        assert!(round_trip(&builder, "", "").is_empty());
        assert_eq!(
            round_trip(&builder, "", "new").parts,
            vec![DiffPart::Insert { start: 0, text: "new".into() }]
        );
        assert_eq!(
            round_trip(&builder, "gone", "").parts,
            vec![DiffPart::Delete { start: 0, length: 4 }]
        );
    }

    #[test]
    fn test_move_uses_cut_and_paste() {
        let builder = DeltaBuilder::with_minimum_match_length(6);
        let a = "== History ==\nlong history text.\n== Geography ==\nmountains and rivers.\n";
        let b = "== Geography ==\nmountains and rivers.\n== History ==\nlong history text.\n";
        let diff = round_trip(&builder, a, b);

        assert!(diff.parts.iter().any(|p| matches!(p, DiffPart::Cut { .. })));
        assert!(diff.parts.iter().any(|p| matches!(p, DiffPart::Paste { .. })));
        // The moved paragraphs travel as blocks, not as inserted text
        let inserted: usize = diff.parts.iter().filter_map(|p| p.text()).map(str::len).sum();
        assert!(inserted < 10, "diff {:?}", diff.parts);
    }

    #[test]
    fn test_build_from_explicit_queues() {
        // A = [x#1][y#2], B = [y#2][x#1]
        let a = chars("xy");
        let b = chars("yx");
        let blocks_a = VecDeque::from(vec![MatchedBlock::matched(1, 0, 1), MatchedBlock::matched(2, 1, 1)]);
        let blocks_b = VecDeque::from(vec![MatchedBlock::matched(2, 0, 1), MatchedBlock::matched(1, 1, 1)]);

        let diff = DeltaBuilder::build(&a, &b, blocks_a, blocks_b).unwrap();
        assert_eq!(
            diff.parts,
            vec![
                DiffPart::Cut { start: 0, length: 1, block_id: 1 },
                DiffPart::Paste { start: 1, block_id: 1 },
            ]
        );
        assert_eq!(diff.apply(Some("xy")).unwrap(), "yx");
    }

    #[test]
    fn test_delete_serviced_before_insert() {
        // A = [g][#0], B = [#0][g]: the A-side gap is handled first
        let a = chars("oldkeep");
        let b = chars("keepnew");
        let blocks_a = VecDeque::from(vec![MatchedBlock::gap(0, 3), MatchedBlock::matched(0, 3, 4)]);
        let blocks_b = VecDeque::from(vec![MatchedBlock::matched(0, 0, 4), MatchedBlock::gap(4, 3)]);

        let diff = DeltaBuilder::build(&a, &b, blocks_a, blocks_b).unwrap();
        assert_eq!(
            diff.parts,
            vec![
                DiffPart::Delete { start: 0, length: 3 },
                DiffPart::Insert { start: 4, text: "new".into() },
            ]
        );
    }

    #[test]
    fn test_contract_violation_is_internal_error() {
        let a = chars("ab");
        let b = chars("ab");
        // B references a block A never had
        let blocks_a = VecDeque::from(vec![MatchedBlock::gap(0, 2)]);
        let blocks_b = VecDeque::from(vec![MatchedBlock::matched(5, 0, 2)]);
        let err = DeltaBuilder::build(&a, &b, blocks_a, blocks_b).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        // A keeps matched text after B is exhausted
        let blocks_a = VecDeque::from(vec![MatchedBlock::matched(0, 0, 2)]);
        let err = DeltaBuilder::build(&a, &b, blocks_a, VecDeque::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    proptest! {
        #[test]
        fn prop_apply_build_reproduces_target(
            a in "[abc \n]{0,40}",
            b in "[abc \n]{0,40}",
            min_len in 1usize..6,
        ) {
            let builder = DeltaBuilder::with_minimum_match_length(min_len);
            let diff = builder.diff(&chars(&a), &chars(&b)).unwrap();
            prop_assert_eq!(diff.apply(Some(&a)).unwrap(), b);
        }

        #[test]
        fn prop_shuffled_paragraphs_round_trip(
            paragraphs in proptest::collection::vec("[a-z]{3,12}", 1..8),
            rotation in 0usize..8,
        ) {
            let a = paragraphs.join("\n");
            let mut moved = paragraphs.clone();
            let len = moved.len();
            moved.rotate_left(rotation % len);
            let b = moved.join("\n");

            let builder = DeltaBuilder::with_minimum_match_length(3);
            let diff = builder.diff(&chars(&a), &chars(&b)).unwrap();
            prop_assert_eq!(diff.apply(Some(&a)).unwrap(), b);
        }
    }
}
