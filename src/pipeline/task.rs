//! Units of pipeline work

use crate::core::types::{ArticleId, Revision, RevisionHeader};
use bytes::Bytes;

/// Role of a task within its article's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The whole article in one task
    Full,
    /// First chunk of an article split across several tasks
    FirstPartial,
    /// Middle chunk of a split article
    Partial,
    /// Final chunk of a split article
    LastPartial,
    /// The article was banned; its remaining chunks are gone
    Banned,
    /// No more work will arrive
    End,
    /// Keep-alive without payload
    Dummy,
}

impl TaskKind {
    /// Chunk of a split article
    pub fn is_partial(self) -> bool {
        matches!(self, TaskKind::FirstPartial | TaskKind::Partial | TaskKind::LastPartial)
    }

    /// Starts an article
    pub fn starts_article(self) -> bool {
        matches!(self, TaskKind::Full | TaskKind::FirstPartial)
    }

    /// Completes an article
    pub fn ends_article(self) -> bool {
        matches!(self, TaskKind::Full | TaskKind::LastPartial)
    }

    /// Delivered through the per-article partial queue
    pub fn is_continuation(self) -> bool {
        matches!(self, TaskKind::Partial | TaskKind::LastPartial | TaskKind::Banned)
    }
}

/// Task routing information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHeader {
    /// Article the task belongs to (0 for `End` and `Dummy`)
    pub article_id: ArticleId,
    /// Task role
    pub kind: TaskKind,
    /// Position of the chunk within the article, from 1
    pub part_counter: u32,
}

/// Payload of a task
pub trait TaskItem: Send {
    /// Bytes accounted against pool limits
    fn byte_size(&self) -> usize;
}

impl TaskItem for Revision {
    fn byte_size(&self) -> usize {
        Revision::byte_size(self)
    }
}

/// An encoded diff on its way to the delta store
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedDiff {
    /// Metadata of the revision the diff produces
    pub header: RevisionHeader,
    /// Encoded diff
    pub payload: Bytes,
    /// The diff is a full-revision checkpoint
    pub checkpoint: bool,
}

impl TaskItem for EncodedDiff {
    fn byte_size(&self) -> usize {
        self.payload.len() + self.header.comment.as_ref().map_or(0, String::len)
    }
}

/// A unit of pipeline work for one article
#[derive(Debug)]
pub struct Task<T> {
    /// Routing information
    pub header: TaskHeader,
    /// Items in counter order
    pub items: Vec<T>,
    byte_size: usize,
}

impl<T: TaskItem> Task<T> {
    /// Create a task carrying `items`
    pub fn new(article_id: ArticleId, kind: TaskKind, part_counter: u32, items: Vec<T>) -> Self {
        let byte_size = items.iter().map(TaskItem::byte_size).sum();
        Self {
            header: TaskHeader {
                article_id,
                kind,
                part_counter,
            },
            items,
            byte_size,
        }
    }

    /// Terminal marker for a banned article
    pub fn banned(article_id: ArticleId) -> Self {
        Self::new(article_id, TaskKind::Banned, 0, Vec::new())
    }

    /// End-of-work marker
    pub fn end() -> Self {
        Self::new(0, TaskKind::End, 0, Vec::new())
    }

    /// Keep-alive task
    pub fn dummy() -> Self {
        Self::new(0, TaskKind::Dummy, 0, Vec::new())
    }

    /// Task role
    pub fn kind(&self) -> TaskKind {
        self.header.kind
    }

    /// Article the task belongs to
    pub fn article_id(&self) -> ArticleId {
        self.header.article_id
    }

    /// Bytes of all items
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_task_accounts_item_bytes() {
        let items = vec![
            Revision::new(1, 1, 1, Utc::now(), "abc"),
            Revision::new(1, 2, 2, Utc::now(), "defgh"),
        ];
        let task = Task::new(1, TaskKind::Full, 1, items);
        assert_eq!(task.byte_size(), 8);
        assert_eq!(task.article_id(), 1);
        assert!(task.kind().starts_article() && task.kind().ends_article());
    }

    #[test]
    fn test_kind_classification() {
        assert!(TaskKind::FirstPartial.is_partial());
        assert!(!TaskKind::FirstPartial.is_continuation());
        assert!(TaskKind::LastPartial.is_continuation() && TaskKind::LastPartial.ends_article());
        assert!(TaskKind::Banned.is_continuation());
        assert!(!TaskKind::Dummy.is_partial());
        assert_eq!(Task::<Revision>::end().kind(), TaskKind::End);
        assert_eq!(Task::<EncodedDiff>::dummy().byte_size(), 0);
    }
}
