//! Pipeline stages: reader, diff workers and writers
//!
//! Each stage is a plain worker running on its own thread and talking to its
//! neighbours only through a [`TaskPool`]. A stage that holds a split article
//! keeps pulling that article's continuations until the last one arrives,
//! the article is banned, or the pipeline is killed.

use crate::codec::DiffCodec;
use crate::core::config::{Config, PipelineConfig};
use crate::core::error::{Error, Result};
use crate::core::types::{ArticleId, Revision, RevisionCounter};
use crate::delta::{DeltaBuilder, Diff};
use crate::pipeline::pool::{ShutdownSignal, TaskPool};
use crate::pipeline::splitter::TaskSplitter;
use crate::pipeline::task::{EncodedDiff, Task, TaskItem, TaskKind};
use crate::storage::{ArticleIndexBuilder, DeltaStore, RevisionIndex};
use crate::system::metrics::Metrics;
use flume::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Progress reported by the stages to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The reader handed a complete article to the diff stage
    ArticleRead {
        /// Article
        article_id: ArticleId,
        /// Revisions read
        revisions: usize,
    },
    /// A diff worker encoded every revision of an article
    ArticleEncoded {
        /// Article
        article_id: ArticleId,
        /// Diffs produced
        diffs: usize,
        /// Encoded bytes, markers included
        bytes: usize,
    },
    /// A writer stored an article and published its index
    ArticlePublished {
        /// Article
        article_id: ArticleId,
        /// Revisions now readable
        revisions: RevisionCounter,
    },
    /// A stage gave up on an article
    ArticleBanned {
        /// Article
        article_id: ArticleId,
        /// Stage that banned it
        stage: String,
        /// Why
        reason: String,
    },
    /// A stage hit its empty-wait budget
    Timeout {
        /// Stage that stalled
        stage: String,
    },
}

/// Turns one revision into the encoded diff stored for it
pub struct RevisionEncoder {
    builder: DeltaBuilder,
    codec: DiffCodec,
    checkpoint_interval: u32,
    verify: bool,
}

impl RevisionEncoder {
    /// Create an encoder from the diff and codec configuration
    pub fn new(config: &Config) -> Self {
        Self {
            builder: DeltaBuilder::with_minimum_match_length(config.diff.minimum_match_length),
            codec: DiffCodec::new(&config.codec),
            checkpoint_interval: config.diff.checkpoint_interval.max(1),
            verify: config.diff.verify_diffs,
        }
    }

    /// Whether `counter` is stored as a full revision
    pub fn is_checkpoint(&self, counter: RevisionCounter) -> bool {
        counter.saturating_sub(1) % self.checkpoint_interval == 0
    }

    /// Encode `revision` whose text is `current`, given the text of the
    /// revision before it.
    ///
    /// With verification enabled the stored bytes are decoded and replayed
    /// against `previous`; any divergence from `current` is an error.
    pub fn encode(&self, revision: &Revision, previous: Option<&[char]>, current: &[char]) -> Result<EncodedDiff> {
        let counter = revision.revision_counter;
        let checkpoint = self.is_checkpoint(counter);

        let diff = match previous {
            _ if checkpoint => Diff::full_revision(current.iter().collect::<String>()),
            Some(previous) => self.builder.diff(previous, current)?,
            None => {
                return Err(Error::internal(format!(
                    "article {} revision {} needs its predecessor's text",
                    revision.article_id, counter
                )))
            }
        };
        let payload = self.codec.encode(&diff)?;

        if self.verify {
            let base = if checkpoint { Vec::new() } else { previous.unwrap_or_default().to_vec() };
            let replayed = self.codec.decode(&payload)?.apply_chars(base)?;
            if replayed != current {
                return Err(Error::internal(format!(
                    "article {} revision {}: diff replays to {} chars, expected {}",
                    revision.article_id,
                    counter,
                    replayed.len(),
                    current.len()
                )));
            }
        }

        Ok(EncodedDiff {
            header: revision.header(),
            payload,
            checkpoint,
        })
    }
}

fn report_ban(events: &Sender<PipelineEvent>, article_id: ArticleId, stage: &str, reason: String) {
    Metrics::global().pipeline.articles_banned.inc();
    warn!(stage, article_id, %reason, "banning article");
    let _ = events.send(PipelineEvent::ArticleBanned {
        article_id,
        stage: stage.to_string(),
        reason,
    });
}

fn report_timeout(events: &Sender<PipelineEvent>, stage: &str, err: &Error) {
    Metrics::global().pipeline.timeouts.inc();
    error!(stage, error = %err, "stage stalled");
    let _ = events.send(PipelineEvent::Timeout {
        stage: stage.to_string(),
    });
}

struct ReadArticle {
    splitter: TaskSplitter<Revision>,
    expected: RevisionCounter,
    revisions: usize,
    skipping: bool,
}

/// Feeds a revision stream into the read pool.
///
/// Revisions arrive grouped by article in counter order. An article whose
/// counters are not gapless from 1 is banned and its remaining revisions
/// are skipped.
pub(crate) struct Reader<'a> {
    pool: &'a TaskPool<Revision>,
    signal: &'a ShutdownSignal,
    events: Sender<PipelineEvent>,
    ceiling: usize,
    keep_alive: Duration,
    keep_alive_tasks: usize,
    last_submit: Instant,
    current: Option<ReadArticle>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(
        pool: &'a TaskPool<Revision>,
        config: &PipelineConfig,
        signal: &'a ShutdownSignal,
        keep_alive_tasks: usize,
        events: Sender<PipelineEvent>,
    ) -> Self {
        Self {
            pool,
            signal,
            events,
            ceiling: config.task_byte_ceiling,
            keep_alive: config.wait_interval * (config.max_empty_waits / 4).max(1),
            keep_alive_tasks,
            last_submit: Instant::now(),
            current: None,
        }
    }

    /// Read until the stream ends or the pipeline shuts down
    pub(crate) fn run<I>(mut self, revisions: I)
    where
        I: IntoIterator<Item = Revision>,
    {
        info!("reader started");
        for revision in revisions {
            if !self.accept(revision) {
                break;
            }
        }
        if !self.signal.is_killed() {
            self.close_article();
        }
        self.pool.finish_production();
        info!("reader finished");
    }

    fn accept(&mut self, revision: Revision) -> bool {
        if self.signal.is_killed() {
            info!("reader killed");
            return false;
        }
        self.send_keep_alive();

        let article_id = revision.article_id;
        let continues = self
            .current
            .as_ref()
            .is_some_and(|article| article.splitter.article_id() == article_id);

        if !continues {
            self.close_article();
            let skipping = match self.pool.wait_for_capacity("reader") {
                Ok(true) => false,
                Ok(false) => {
                    info!(article_id, "reader stopping before article");
                    return false;
                }
                Err(e) => {
                    report_timeout(&self.events, "reader", &e);
                    report_ban(&self.events, article_id, "reader", e.to_string());
                    true
                }
            };
            self.current = Some(ReadArticle {
                splitter: TaskSplitter::new(article_id, self.ceiling),
                expected: 1,
                revisions: 0,
                skipping,
            });
        }

        let Some(article) = self.current.as_mut() else {
            return true;
        };
        if article.skipping {
            return true;
        }

        if revision.revision_counter != article.expected {
            let reason = format!(
                "expected revision counter {}, got {}",
                article.expected, revision.revision_counter
            );
            if article.splitter.parts_emitted() > 0 {
                self.pool.ban(article_id);
                // The rest of the article, LastPartial included, is never sent
                self.pool.close(article_id);
            }
            article.skipping = true;
            report_ban(&self.events, article_id, "reader", reason);
            return true;
        }

        article.expected += 1;
        article.revisions += 1;
        if let Some(task) = article.splitter.push(revision) {
            self.submit(task);
        }
        true
    }

    fn close_article(&mut self) {
        let Some(article) = self.current.take() else {
            return;
        };
        if article.skipping {
            return;
        }
        let article_id = article.splitter.article_id();
        if let Some(task) = article.splitter.finish() {
            if self.submit(task) {
                let _ = self.events.send(PipelineEvent::ArticleRead {
                    article_id,
                    revisions: article.revisions,
                });
            }
        }
    }

    fn submit(&mut self, task: Task<Revision>) -> bool {
        let kind = task.kind();
        let article_id = task.article_id();
        debug!(article_id, ?kind, part = task.header.part_counter, bytes = task.byte_size(), "reader submitting task");

        let accepted = self.pool.submit(task);
        self.last_submit = Instant::now();
        if !accepted && kind.starts_article() {
            // Refused after a stop; the rest of the article goes nowhere
            if let Some(article) = self.current.as_mut() {
                article.skipping = true;
            }
        }
        accepted
    }

    fn send_keep_alive(&mut self) {
        if self.last_submit.elapsed() < self.keep_alive {
            return;
        }
        debug!(tasks = self.keep_alive_tasks, "reader idle, sending keep-alive tasks");
        for _ in 0..self.keep_alive_tasks {
            self.pool.submit(Task::dummy());
        }
        self.last_submit = Instant::now();
    }
}

/// Builds and encodes diffs for the articles of the read pool
pub(crate) struct DiffWorker<'a> {
    name: String,
    encoder: &'a RevisionEncoder,
    input: &'a TaskPool<Revision>,
    output: &'a TaskPool<EncodedDiff>,
    events: Sender<PipelineEvent>,
}

impl<'a> DiffWorker<'a> {
    pub(crate) fn new(
        id: usize,
        encoder: &'a RevisionEncoder,
        input: &'a TaskPool<Revision>,
        output: &'a TaskPool<EncodedDiff>,
        events: Sender<PipelineEvent>,
    ) -> Self {
        Self {
            name: format!("diff-worker-{}", id),
            encoder,
            input,
            output,
            events,
        }
    }

    /// Process articles until the read pool reports the end of work
    pub(crate) fn run(self) {
        info!(worker = %self.name, "diff worker started");
        loop {
            match self.output.wait_for_capacity(&self.name) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    report_timeout(&self.events, &self.name, &e);
                    continue;
                }
            }

            let task = match self.input.next_task() {
                Ok(task) => task,
                Err(e) => {
                    report_timeout(&self.events, &self.name, &e);
                    continue;
                }
            };

            match task.kind() {
                TaskKind::End => break,
                TaskKind::Dummy => {
                    self.output.submit(Task::dummy());
                }
                _ => self.process_article(task),
            }
        }
        info!(worker = %self.name, "diff worker finished");
    }

    fn process_article(&self, first: Task<Revision>) {
        let article_id = first.article_id();
        let mut previous: Option<Vec<char>> = None;
        let (mut diffs, mut bytes) = (0usize, 0usize);
        let mut task = first;

        loop {
            let kind = task.kind();
            match kind {
                TaskKind::Banned => {
                    debug!(worker = %self.name, article_id, "article banned upstream");
                    self.output.ban(article_id);
                    self.output.close(article_id);
                    return;
                }
                TaskKind::End => {
                    debug!(worker = %self.name, article_id, "killed while holding article");
                    return;
                }
                _ => {}
            }

            let part = task.header.part_counter;
            debug!(worker = %self.name, article_id, ?kind, part, revisions = task.items.len(), "encoding task");
            match self.encode_items(&task.items, &mut previous) {
                Ok(encoded) => {
                    diffs += encoded.len();
                    bytes += encoded.iter().map(|diff| diff.payload.len()).sum::<usize>();
                    if !self.output.submit(Task::new(article_id, kind, part, encoded)) && kind.starts_article() {
                        debug!(worker = %self.name, article_id, "write pool refused article");
                        self.abandon(article_id, kind);
                        return;
                    }
                }
                Err(e) => {
                    report_ban(&self.events, article_id, &self.name, e.to_string());
                    self.abandon(article_id, kind);
                    return;
                }
            }

            if kind.ends_article() {
                let _ = self.events.send(PipelineEvent::ArticleEncoded {
                    article_id,
                    diffs,
                    bytes,
                });
                return;
            }

            task = match self.input.next_partial(article_id) {
                Ok(next) => next,
                Err(e) => {
                    report_timeout(&self.events, &self.name, &e);
                    report_ban(&self.events, article_id, &self.name, e.to_string());
                    self.abandon(article_id, kind);
                    return;
                }
            };
        }
    }

    fn encode_items(&self, items: &[Revision], previous: &mut Option<Vec<char>>) -> Result<Vec<EncodedDiff>> {
        items
            .iter()
            .map(|revision| {
                let text = revision.text().ok_or_else(|| {
                    Error::internal(format!(
                        "article {} revision {} carries no text",
                        revision.article_id, revision.revision_counter
                    ))
                })?;
                let current: Vec<char> = text.chars().collect();
                let encoded = self.encoder.encode(revision, previous.as_deref(), &current)?;
                *previous = Some(current);
                Ok(encoded)
            })
            .collect()
    }

    /// Ban the article in both pools and drop whatever is left of it
    fn abandon(&self, article_id: ArticleId, held: TaskKind) {
        self.input.ban(article_id);
        self.output.ban(article_id);
        self.output.close(article_id);
        if !held.ends_article() {
            drain(self.input, article_id);
        }
    }
}

/// Stores encoded diffs and publishes article indexes
pub(crate) struct Writer<'a> {
    name: String,
    store: &'a dyn DeltaStore,
    index: &'a RevisionIndex,
    input: &'a TaskPool<EncodedDiff>,
    events: Sender<PipelineEvent>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(
        id: usize,
        store: &'a dyn DeltaStore,
        index: &'a RevisionIndex,
        input: &'a TaskPool<EncodedDiff>,
        events: Sender<PipelineEvent>,
    ) -> Self {
        Self {
            name: format!("writer-{}", id),
            store,
            index,
            input,
            events,
        }
    }

    /// Write articles until the write pool reports the end of work
    pub(crate) fn run(self) {
        info!(worker = %self.name, "writer started");
        loop {
            let task = match self.input.next_task() {
                Ok(task) => task,
                Err(e) => {
                    report_timeout(&self.events, &self.name, &e);
                    continue;
                }
            };
            match task.kind() {
                TaskKind::End => break,
                TaskKind::Dummy => continue,
                _ => self.write_article(task),
            }
        }
        info!(worker = %self.name, "writer finished");
    }

    fn write_article(&self, first: Task<EncodedDiff>) {
        let article_id = first.article_id();
        // Index entries stay private until the article's last task is written
        let mut staged = ArticleIndexBuilder::new(article_id);
        let mut task = first;

        loop {
            let kind = task.kind();
            match kind {
                TaskKind::Banned | TaskKind::End => {
                    debug!(worker = %self.name, article_id, staged = staged.len(), "discarding staged article");
                    return;
                }
                _ => {}
            }

            if let Err(e) = self.write_items(task.items, &mut staged) {
                report_ban(&self.events, article_id, &self.name, e.to_string());
                self.abandon(article_id, kind);
                return;
            }

            if kind.ends_article() {
                match staged.build() {
                    Ok(built) => {
                        let revisions = built.revision_count();
                        self.index.publish(built);
                        debug!(worker = %self.name, article_id, revisions, "article published");
                        let _ = self.events.send(PipelineEvent::ArticlePublished {
                            article_id,
                            revisions,
                        });
                    }
                    Err(e) => report_ban(&self.events, article_id, &self.name, e.to_string()),
                }
                return;
            }

            task = match self.input.next_partial(article_id) {
                Ok(next) => next,
                Err(e) => {
                    report_timeout(&self.events, &self.name, &e);
                    report_ban(&self.events, article_id, &self.name, e.to_string());
                    self.abandon(article_id, kind);
                    return;
                }
            };
        }
    }

    fn write_items(&self, items: Vec<EncodedDiff>, staged: &mut ArticleIndexBuilder) -> Result<()> {
        let metrics = &Metrics::global().pipeline;
        for EncodedDiff {
            header,
            payload,
            checkpoint,
        } in items
        {
            let key = self.store.put(header.clone(), payload)?;
            staged.push(&header, key, checkpoint)?;
            metrics.diffs_written.inc();
        }
        Ok(())
    }

    fn abandon(&self, article_id: ArticleId, held: TaskKind) {
        self.input.ban(article_id);
        if !held.ends_article() {
            drain(self.input, article_id);
        }
    }
}

/// Pull and drop continuations of a banned article until its stream ends
fn drain<T: TaskItem>(pool: &TaskPool<T>, article_id: ArticleId) {
    loop {
        match pool.next_partial(article_id) {
            Ok(task) if task.kind() == TaskKind::Partial => continue,
            Ok(_) => return,
            Err(e) => {
                debug!(article_id, error = %e, "gave up draining banned article");
                return;
            }
        }
    }
}
