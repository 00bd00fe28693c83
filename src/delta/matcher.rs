//! Block matching between two revisions
//!
//! A block matcher partitions both revisions into ordered blocks. Blocks that
//! occur verbatim in both revisions share a correlation id; everything else
//! is a gap. The delta builder only relies on that contract:
//!
//! - blocks of each side cover every character of that side, in order;
//! - each matched id appears exactly once on each side;
//! - gap text of one side is not claimed by any matched block.

use crate::constants::MAX_MATCH_CANDIDATES;
use std::collections::{HashMap, VecDeque};

/// Correlation tag of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    /// Text unique to one revision
    Gap,
    /// Text common to both revisions, correlated by id
    Matched(u32),
}

/// One segment of a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedBlock {
    /// Correlation tag
    pub tag: BlockTag,
    /// First character of the block in its revision
    pub start: usize,
    /// Number of characters
    pub len: usize,
}

impl MatchedBlock {
    /// Create a matched block
    pub fn matched(id: u32, start: usize, len: usize) -> Self {
        Self { tag: BlockTag::Matched(id), start, len }
    }

    /// Create a gap block
    pub fn gap(start: usize, len: usize) -> Self {
        Self { tag: BlockTag::Gap, start, len }
    }

    /// Whether this block is revision-unique text
    pub fn is_gap(&self) -> bool {
        self.tag == BlockTag::Gap
    }

    /// Character range covered by the block
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Ordered block queues for revision A and revision B
pub type BlockQueues = (VecDeque<MatchedBlock>, VecDeque<MatchedBlock>);

/// Source of matched blocks for a pair of revisions
pub trait BlockMatcher: Send + Sync {
    /// Partition `a` and `b` into correlated blocks
    fn match_blocks(&self, a: &[char], b: &[char]) -> BlockQueues;
}

/// Greedy, move-aware block matcher.
///
/// The common prefix and suffix are always matched. Inside the changed
/// region, every k-gram of A (k = minimum match length) is indexed; B is
/// scanned left to right and each anchor is extended as far as both sides
/// agree over characters of A not yet claimed. The longest extension wins.
/// Because matches are found in B order but may point anywhere in A,
/// relocated paragraphs come out as matched blocks in a different order,
/// which the builder turns into cut/paste.
#[derive(Debug, Clone)]
pub struct GreedyBlockMatcher {
    minimum_match_length: usize,
}

/// A matched run: start in A, start in B, length, id
#[derive(Debug, Clone, Copy)]
struct Run {
    a: usize,
    b: usize,
    len: usize,
    id: u32,
}

impl GreedyBlockMatcher {
    /// Create a matcher ignoring common runs shorter than `minimum_match_length`
    pub fn new(minimum_match_length: usize) -> Self {
        Self {
            minimum_match_length: minimum_match_length.max(1),
        }
    }

    /// Configured minimum match length
    pub fn minimum_match_length(&self) -> usize {
        self.minimum_match_length
    }

    fn find_runs(&self, a: &[char], b: &[char]) -> Vec<Run> {
        let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
        let max_suffix = a.len().min(b.len()) - prefix;
        let suffix = a
            .iter()
            .rev()
            .zip(b.iter().rev())
            .take(max_suffix)
            .take_while(|(x, y)| x == y)
            .count();

        let mut runs = Vec::new();
        let mut next_id = 0u32;

        if prefix > 0 {
            runs.push(Run { a: 0, b: 0, len: prefix, id: next_id });
            next_id += 1;
        }

        let a_mid = &a[prefix..a.len() - suffix];
        let b_mid = &b[prefix..b.len() - suffix];
        for (a_off, b_off, len) in self.match_middle(a_mid, b_mid) {
            runs.push(Run {
                a: prefix + a_off,
                b: prefix + b_off,
                len,
                id: next_id,
            });
            next_id += 1;
        }

        if suffix > 0 {
            runs.push(Run {
                a: a.len() - suffix,
                b: b.len() - suffix,
                len: suffix,
                id: next_id,
            });
        }

        runs
    }

    /// Anchor-and-extend matching of the changed region; returns runs in B order.
    fn match_middle(&self, a: &[char], b: &[char]) -> Vec<(usize, usize, usize)> {
        let k = self.minimum_match_length;
        if a.len() < k || b.len() < k {
            return Vec::new();
        }

        let mut anchors: HashMap<&[char], Vec<usize>> = HashMap::new();
        for i in 0..=a.len() - k {
            anchors.entry(&a[i..i + k]).or_default().push(i);
        }

        let mut claimed = vec![false; a.len()];
        let mut runs = Vec::new();
        let mut j = 0;

        while j + k <= b.len() {
            let mut best: Option<(usize, usize)> = None;

            if let Some(candidates) = anchors.get(&b[j..j + k]) {
                for &i in candidates.iter().filter(|&&i| !claimed[i]).take(MAX_MATCH_CANDIDATES) {
                    let len = a[i..]
                        .iter()
                        .zip(&b[j..])
                        .zip(&claimed[i..])
                        .take_while(|((x, y), used)| x == y && !**used)
                        .count();
                    if best.map_or(true, |(_, best_len)| len > best_len) {
                        best = Some((i, len));
                    }
                }
            }

            match best {
                Some((i, len)) if len >= k => {
                    claimed[i..i + len].iter_mut().for_each(|used| *used = true);
                    runs.push((i, j, len));
                    j += len;
                }
                _ => j += 1,
            }
        }

        runs
    }
}

impl Default for GreedyBlockMatcher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MINIMUM_MATCH_LENGTH)
    }
}

impl BlockMatcher for GreedyBlockMatcher {
    fn match_blocks(&self, a: &[char], b: &[char]) -> BlockQueues {
        let mut runs = self.find_runs(a, b);

        // B side: runs are already in B order
        let blocks_b = partition(b.len(), runs.iter().map(|r| (r.b, r.len, r.id)));

        runs.sort_by_key(|r| r.a);
        let blocks_a = partition(a.len(), runs.iter().map(|r| (r.a, r.len, r.id)));

        (blocks_a, blocks_b)
    }
}

/// Fill the space between ordered, disjoint runs with gap blocks.
fn partition(total: usize, runs: impl Iterator<Item = (usize, usize, u32)>) -> VecDeque<MatchedBlock> {
    let mut blocks = VecDeque::new();
    let mut cursor = 0;

    for (start, len, id) in runs {
        if start > cursor {
            blocks.push_back(MatchedBlock::gap(cursor, start - cursor));
        }
        blocks.push_back(MatchedBlock::matched(id, start, len));
        cursor = start + len;
    }

    if total > cursor {
        blocks.push_back(MatchedBlock::gap(cursor, total - cursor));
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn assert_covers(blocks: &VecDeque<MatchedBlock>, len: usize) {
        let mut cursor = 0;
        for block in blocks {
            assert_eq!(block.start, cursor);
            assert!(block.len > 0);
            cursor += block.len;
        }
        assert_eq!(cursor, len);
    }

    #[test]
    fn test_prefix_and_suffix_matched() {
        let matcher = GreedyBlockMatcher::new(12);
        let (a, b) = matcher.match_blocks(&chars("abcdef"), &chars("abXYZf"));

        assert_eq!(
            Vec::from(a),
            vec![MatchedBlock::matched(0, 0, 2), MatchedBlock::gap(2, 3), MatchedBlock::matched(1, 5, 1)]
        );
        assert_eq!(
            Vec::from(b),
            vec![MatchedBlock::matched(0, 0, 2), MatchedBlock::gap(2, 3), MatchedBlock::matched(1, 5, 1)]
        );
    }

    #[test]
    fn test_identical_text_single_block() {
        let matcher = GreedyBlockMatcher::new(4);
        let text = chars("unchanged article body");
        let (a, b) = matcher.match_blocks(&text, &text);
        assert_eq!(Vec::from(a), vec![MatchedBlock::matched(0, 0, text.len())]);
        assert_eq!(Vec::from(b), vec![MatchedBlock::matched(0, 0, text.len())]);
    }

    #[test]
    fn test_empty_sides() {
        let matcher = GreedyBlockMatcher::new(3);
        let (a, b) = matcher.match_blocks(&[], &chars("new"));
        assert!(a.is_empty());
        assert_eq!(Vec::from(b), vec![MatchedBlock::gap(0, 3)]);

        let (a, b) = matcher.match_blocks(&[], &[]);
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_moved_block_detected() {
        let matcher = GreedyBlockMatcher::new(5);
        let a = chars("[alpha section][beta section]");
        let b = chars("[beta section][alpha section]");
        let (blocks_a, blocks_b) = matcher.match_blocks(&a, &b);

        assert_covers(&blocks_a, a.len());
        assert_covers(&blocks_b, b.len());

        let ids_a: Vec<_> = blocks_a.iter().filter(|b| !b.is_gap()).map(|b| b.tag).collect();
        let ids_b: Vec<_> = blocks_b.iter().filter(|b| !b.is_gap()).map(|b| b.tag).collect();
        assert_eq!(ids_a.len(), ids_b.len());
        assert_ne!(ids_a, ids_b, "relocated blocks should appear in a different order");
    }

    #[test]
    fn test_matched_blocks_are_verbatim() {
        let matcher = GreedyBlockMatcher::new(3);
        let a = chars("the quick brown fox jumps over the lazy dog");
        let b = chars("the lazy dog was jumped over by the quick brown fox");
        let (blocks_a, blocks_b) = matcher.match_blocks(&a, &b);

        assert_covers(&blocks_a, a.len());
        assert_covers(&blocks_b, b.len());

        for block_b in blocks_b.iter().filter(|b| !b.is_gap()) {
            let block_a = blocks_a.iter().find(|x| x.tag == block_b.tag).unwrap();
            assert_eq!(&a[block_a.range()], &b[block_b.range()]);
        }
    }
}
