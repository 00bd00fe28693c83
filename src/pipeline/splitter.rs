//! Splits an article's items into tasks under a byte ceiling

use crate::core::types::ArticleId;
use crate::pipeline::task::{Task, TaskItem, TaskKind};

/// Accumulates one article's items and cuts them into tasks.
///
/// An item that would push the open task past the ceiling closes it first.
/// A single item larger than the ceiling travels alone.
#[derive(Debug)]
pub struct TaskSplitter<T> {
    article_id: ArticleId,
    ceiling: usize,
    items: Vec<T>,
    bytes: usize,
    parts_emitted: u32,
}

impl<T: TaskItem> TaskSplitter<T> {
    /// Start splitting `article_id` with a per-task byte ceiling
    pub fn new(article_id: ArticleId, ceiling: usize) -> Self {
        Self {
            article_id,
            ceiling,
            items: Vec::new(),
            bytes: 0,
            parts_emitted: 0,
        }
    }

    /// Add the next item; returns a task when the open one had to be closed
    pub fn push(&mut self, item: T) -> Option<Task<T>> {
        let size = item.byte_size();
        let closed = if !self.items.is_empty() && self.bytes + size > self.ceiling {
            let kind = if self.parts_emitted == 0 {
                TaskKind::FirstPartial
            } else {
                TaskKind::Partial
            };
            Some(self.emit(kind))
        } else {
            None
        };

        self.bytes += size;
        self.items.push(item);
        closed
    }

    /// Close the article: `Full` if it never split, `LastPartial` otherwise
    pub fn finish(mut self) -> Option<Task<T>> {
        if self.parts_emitted == 0 {
            if self.items.is_empty() {
                return None;
            }
            return Some(self.emit(TaskKind::Full));
        }
        Some(self.emit(TaskKind::LastPartial))
    }

    /// Tasks handed out so far
    pub fn parts_emitted(&self) -> u32 {
        self.parts_emitted
    }

    /// Article being split
    pub fn article_id(&self) -> ArticleId {
        self.article_id
    }

    fn emit(&mut self, kind: TaskKind) -> Task<T> {
        self.parts_emitted += 1;
        self.bytes = 0;
        Task::new(self.article_id, kind, self.parts_emitted, std::mem::take(&mut self.items))
    }
}
