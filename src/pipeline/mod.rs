//! Bounded producer/consumer pipeline
//!
//! A reader splits each article's revision stream into tasks under a byte
//! ceiling, diff workers turn revisions into encoded diffs, and writers put
//! the diffs into a [`DeltaStore`] and publish the article's index. Stages
//! are connected by [`TaskPool`]s; a producer only starts a new article when
//! the pool downstream reports free capacity.

pub mod pool;
pub mod splitter;
pub mod stages;
pub mod task;

#[cfg(test)]
mod tests;

pub use self::pool::{CapacityStatus, ShutdownSignal, TaskPool};
pub use self::splitter::TaskSplitter;
pub use self::stages::{PipelineEvent, RevisionEncoder};
pub use self::task::{EncodedDiff, Task, TaskHeader, TaskItem, TaskKind};

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{ArticleId, Revision};
use crate::storage::{DeltaStore, RevisionIndex};
use self::stages::{DiffWorker, Reader, Writer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::ScopedJoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Cloneable handle to stop or kill a running pipeline from another thread
#[derive(Debug, Clone)]
pub struct PipelineControl {
    signal: Arc<ShutdownSignal>,
}

impl PipelineControl {
    /// Stop admitting new articles; articles already in flight complete
    pub fn stop(&self) {
        info!("pipeline stop requested");
        self.signal.stop();
    }

    /// Interrupt every stage; articles in flight are discarded
    pub fn kill(&self) {
        info!("pipeline kill requested");
        self.signal.kill();
    }

    /// Whether a stop or kill was requested
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }
}

/// An article given up by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannedArticle {
    /// Article
    pub article_id: ArticleId,
    /// Stage that banned it
    pub stage: String,
    /// Why
    pub reason: String,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Articles handed to the diff stage
    pub articles_read: usize,
    /// Revisions in those articles
    pub revisions_read: usize,
    /// Diffs encoded
    pub diffs_encoded: usize,
    /// Encoded bytes
    pub encoded_bytes: usize,
    /// Articles stored and indexed
    pub articles_published: usize,
    /// Revisions now readable
    pub revisions_published: u64,
    /// Distinct banned articles
    pub articles_banned: usize,
    /// Every ban, in the order reported
    pub banned: Vec<BannedArticle>,
    /// Stalls reported by any stage
    pub timeouts: usize,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl PipelineReport {
    fn record(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::ArticleRead { revisions, .. } => {
                self.articles_read += 1;
                self.revisions_read += revisions;
            }
            PipelineEvent::ArticleEncoded { diffs, bytes, .. } => {
                self.diffs_encoded += diffs;
                self.encoded_bytes += bytes;
            }
            PipelineEvent::ArticlePublished { revisions, .. } => {
                self.articles_published += 1;
                self.revisions_published += u64::from(revisions);
            }
            PipelineEvent::ArticleBanned {
                article_id,
                stage,
                reason,
            } => self.banned.push(BannedArticle {
                article_id,
                stage,
                reason,
            }),
            PipelineEvent::Timeout { .. } => self.timeouts += 1,
        }
    }

    fn from_events(events: impl IntoIterator<Item = PipelineEvent>, elapsed: Duration) -> Self {
        let mut report = Self::default();
        for event in events {
            report.record(event);
        }
        report.articles_banned = report.banned.iter().map(|b| b.article_id).collect::<BTreeSet<_>>().len();
        report.elapsed = elapsed;
        report
    }

    /// Whether the given article was banned by any stage
    pub fn is_banned(&self, article_id: ArticleId) -> bool {
        self.banned.iter().any(|b| b.article_id == article_id)
    }
}

/// Runs revision streams into a delta store
pub struct Pipeline {
    config: Config,
    store: Arc<dyn DeltaStore>,
    index: Arc<RevisionIndex>,
    signal: Arc<ShutdownSignal>,
}

impl Pipeline {
    /// Create a pipeline writing into `store` and publishing to `index`
    pub fn new(config: Config, store: Arc<dyn DeltaStore>, index: Arc<RevisionIndex>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            index,
            signal: Arc::new(ShutdownSignal::new()),
        })
    }

    /// Handle for stopping or killing `run` from another thread
    pub fn control(&self) -> PipelineControl {
        PipelineControl {
            signal: self.signal.clone(),
        }
    }

    /// Feed `revisions` through the pipeline on the calling thread.
    ///
    /// Revisions must arrive grouped by article in counter order. Returns
    /// once every stage has finished; articles that could not be stored
    /// are listed in the report rather than failing the run.
    pub fn run<I>(&self, revisions: I) -> Result<PipelineReport>
    where
        I: IntoIterator<Item = Revision>,
    {
        let started = Instant::now();
        let pipeline = &self.config.pipeline;
        let diff_workers = self.config.optimal_diff_workers();
        let writer_workers = pipeline.writer_workers;

        let read_pool = TaskPool::<Revision>::new("read-pool", pipeline, self.signal.clone());
        let write_pool = TaskPool::<EncodedDiff>::new("write-pool", pipeline, self.signal.clone());
        let encoder = RevisionEncoder::new(&self.config);
        let (events, received) = flume::unbounded();

        info!(diff_workers, writer_workers, "pipeline starting");

        std::thread::scope(|scope| -> Result<()> {
            let mut diff_handles: Vec<ScopedJoinHandle<'_, ()>> = Vec::with_capacity(diff_workers);
            for id in 0..diff_workers {
                let worker = DiffWorker::new(id, &encoder, &read_pool, &write_pool, events.clone());
                let spawned = std::thread::Builder::new()
                    .name(format!("diff-worker-{}", id))
                    .spawn_scoped(scope, move || worker.run());
                diff_handles.push(self.spawned(spawned)?);
            }

            let mut writer_handles: Vec<ScopedJoinHandle<'_, ()>> = Vec::with_capacity(writer_workers);
            for id in 0..writer_workers {
                let writer = Writer::new(id, self.store.as_ref(), &self.index, &write_pool, events.clone());
                let spawned = std::thread::Builder::new()
                    .name(format!("writer-{}", id))
                    .spawn_scoped(scope, move || writer.run());
                writer_handles.push(self.spawned(spawned)?);
            }

            Reader::new(&read_pool, pipeline, &self.signal, diff_workers, events.clone()).run(revisions);

            let diff_result = self.join_all(diff_handles, "diff worker");
            write_pool.finish_production();
            let writer_result = self.join_all(writer_handles, "writer");
            diff_result.and(writer_result)
        })?;

        drop(events);
        let report = PipelineReport::from_events(received.try_iter(), started.elapsed());
        info!(
            articles = report.articles_published,
            revisions = report.revisions_published,
            banned = report.articles_banned,
            timeouts = report.timeouts,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(report)
    }

    fn spawned<T>(&self, spawned: std::io::Result<T>) -> Result<T> {
        spawned.map_err(|e| {
            error!(error = %e, "failed to spawn pipeline thread");
            // Already running stages must not wait for work that never comes
            self.signal.kill();
            Error::from(e)
        })
    }

    fn join_all(&self, handles: Vec<ScopedJoinHandle<'_, ()>>, role: &str) -> Result<()> {
        let mut result = Ok(());
        for handle in handles {
            if handle.join().is_err() {
                error!(role, "pipeline thread panicked");
                self.signal.kill();
                result = Err(Error::internal(format!("{} thread panicked", role)));
            }
        }
        result
    }
}
