//! Shared task pool between two pipeline stages
//!
//! One coarse lock guards the whole pool: the queue of article-starting
//! tasks, the per-article continuation queues, the banned set and the byte
//! total. Contention is bounded by the handful of stage threads.
//!
//! Producers check `capacity` before starting a new article. Continuations
//! of an article already in flight are always accepted, so a consumer
//! holding an article can finish it whatever the limits say.

use crate::core::backoff::WaitPolicy;
use crate::core::config::PipelineConfig;
use crate::core::error::Result;
use crate::core::types::ArticleId;
use crate::pipeline::task::{Task, TaskItem, TaskKind};
use crate::system::metrics::Metrics;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer to a producer asking whether it may start new work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    /// New work is welcome
    Free,
    /// Queued bytes reached the pool's byte limit
    CacheLimitReached,
    /// Queued article-starting tasks reached the pool's task limit
    TaskLimitReached,
    /// A stop or kill was requested
    ShutdownInProgress,
}

/// Cooperative cancellation shared by every pool of a pipeline
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    stop: AtomicBool,
    kill: AtomicBool,
}

impl ShutdownSignal {
    /// Create a signal with neither flag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop admitting new articles
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop and interrupt every blocked wait
    pub fn kill(&self) {
        self.stop.store(true, Ordering::Release);
        self.kill.store(true, Ordering::Release);
    }

    /// Stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Kill was requested
    pub fn is_killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }
}

struct PoolState<T> {
    /// Full, FirstPartial and Dummy tasks in submission order
    starts: VecDeque<Task<T>>,
    /// Continuations per article
    partials: HashMap<ArticleId, VecDeque<Task<T>>>,
    /// Articles whose remaining continuations are discarded on arrival
    banned: HashSet<ArticleId>,
    /// Split articles whose LastPartial has not been submitted
    open: HashSet<ArticleId>,
    /// Split articles handed to a consumer whose LastPartial it has not received
    in_flight: HashSet<ArticleId>,
    bytes: usize,
    production_finished: bool,
}

/// Bounded hand-off between a producing and a consuming stage
pub struct TaskPool<T> {
    name: String,
    state: Mutex<PoolState<T>>,
    byte_limit: usize,
    task_limit: usize,
    wait: WaitPolicy,
    signal: Arc<ShutdownSignal>,
}

impl<T: TaskItem> TaskPool<T> {
    /// Create a pool named `name` (used in logs and timeouts)
    pub fn new(name: impl Into<String>, config: &PipelineConfig, signal: Arc<ShutdownSignal>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PoolState {
                starts: VecDeque::new(),
                partials: HashMap::new(),
                banned: HashSet::new(),
                open: HashSet::new(),
                in_flight: HashSet::new(),
                bytes: 0,
                production_finished: false,
            }),
            byte_limit: config.pool_byte_limit,
            task_limit: config.pool_task_limit,
            wait: WaitPolicy::new(config.wait_interval, config.max_empty_waits),
            signal,
        }
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a producer may start a new article
    pub fn capacity(&self) -> CapacityStatus {
        if self.signal.is_stopped() {
            return CapacityStatus::ShutdownInProgress;
        }
        let state = self.state.lock();
        if state.bytes >= self.byte_limit {
            CapacityStatus::CacheLimitReached
        } else if state.starts.len() >= self.task_limit {
            CapacityStatus::TaskLimitReached
        } else {
            CapacityStatus::Free
        }
    }

    /// Wait until `capacity` is `Free`.
    ///
    /// Returns `false` on shutdown and a timeout error if the pool stays
    /// full for the whole wait budget.
    pub fn wait_for_capacity(&self, stage: &str) -> Result<bool> {
        let mut backoff = self.wait.backoff(format!("{} waiting on {} capacity", stage, self.name));
        loop {
            match self.capacity() {
                CapacityStatus::Free => return Ok(true),
                CapacityStatus::ShutdownInProgress => return Ok(false),
                status => {
                    debug!(pool = %self.name, ?status, "pool full, backing off");
                    backoff.wait()?;
                }
            }
        }
    }

    /// Queue a task. Returns `false` when it was discarded instead.
    ///
    /// Continuations of banned articles are dropped; the article's
    /// `LastPartial` or a [`close`](Self::close) lifts the ban. New
    /// articles are refused after a stop.
    pub fn submit(&self, task: Task<T>) -> bool {
        let kind = task.kind();
        let article_id = task.article_id();
        let metrics = &Metrics::global().pipeline;
        let mut state = self.state.lock();

        match kind {
            TaskKind::Dummy => {
                state.starts.push_back(task);
                return true;
            }
            TaskKind::End | TaskKind::Banned => {
                warn!(pool = %self.name, ?kind, article_id, "marker tasks are not submitted, ignoring");
                return false;
            }
            TaskKind::Full | TaskKind::FirstPartial if self.signal.is_stopped() => {
                debug!(pool = %self.name, article_id, "pool stopped, refusing new article");
                return false;
            }
            _ => {}
        }

        if state.banned.contains(&article_id) {
            if kind == TaskKind::LastPartial {
                state.banned.remove(&article_id);
                state.open.remove(&article_id);
            }
            metrics.tasks_discarded.inc();
            debug!(pool = %self.name, article_id, ?kind, "discarding task of banned article");
            return false;
        }

        let bytes = task.byte_size();
        state.bytes += bytes;
        metrics.pooled_bytes.add(bytes as i64);
        metrics.tasks_submitted.inc();

        match kind {
            TaskKind::FirstPartial => {
                state.open.insert(article_id);
                state.starts.push_back(task);
            }
            TaskKind::Full => state.starts.push_back(task),
            _ => {
                if kind == TaskKind::LastPartial {
                    state.open.remove(&article_id);
                }
                state.partials.entry(article_id).or_default().push_back(task);
            }
        }
        true
    }

    /// Next article-starting or keep-alive task.
    ///
    /// Returns an `End` task once production finished (or a stop was
    /// requested) and nothing is queued, or immediately on kill.
    pub fn next_task(&self) -> Result<Task<T>> {
        let mut backoff = self.wait.backoff(format!("{} next task", self.name));
        loop {
            if self.signal.is_killed() {
                return Ok(Task::end());
            }
            {
                let mut state = self.state.lock();
                if self.signal.is_stopped() {
                    // Nothing new is handed out after a stop
                    return Ok(Task::end());
                }
                if let Some(task) = state.starts.pop_front() {
                    if task.kind() == TaskKind::FirstPartial {
                        state.in_flight.insert(task.article_id());
                    }
                    self.release(&mut state, &task);
                    return Ok(task);
                }
                if state.production_finished {
                    return Ok(Task::end());
                }
            }
            backoff.wait()?;
        }
    }

    /// Next continuation of `article_id`: `Partial`, `LastPartial`, or
    /// `Banned` when the article was banned meanwhile. Returns `End` on kill.
    pub fn next_partial(&self, article_id: ArticleId) -> Result<Task<T>> {
        let mut backoff = self.wait.backoff(format!("{} next part of article {}", self.name, article_id));
        loop {
            if self.signal.is_killed() {
                return Ok(Task::end());
            }
            {
                let mut state = self.state.lock();
                let next = state.partials.get_mut(&article_id).and_then(VecDeque::pop_front);
                if let Some(task) = next {
                    if state.partials.get(&article_id).is_some_and(VecDeque::is_empty) {
                        state.partials.remove(&article_id);
                    }
                    if matches!(task.kind(), TaskKind::LastPartial | TaskKind::Banned) {
                        state.in_flight.remove(&article_id);
                    }
                    self.release(&mut state, &task);
                    return Ok(task);
                }
                if state.production_finished && !state.open.contains(&article_id) {
                    // The producer is gone and will never send the rest
                    state.in_flight.remove(&article_id);
                    return Ok(Task::banned(article_id));
                }
            }
            backoff.wait()?;
        }
    }

    /// Ban `article_id`: drop everything queued for it, refuse its future
    /// continuations, and hand a `Banned` marker to a consumer holding it.
    pub fn ban(&self, article_id: ArticleId) {
        let metrics = &Metrics::global().pipeline;
        let mut state = self.state.lock();

        let mut discarded: Vec<Task<T>> = state.partials.remove(&article_id).map(Vec::from).unwrap_or_default();
        let starts = std::mem::take(&mut state.starts);
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            starts.into_iter().partition(|task| task.kind() != TaskKind::Dummy && task.article_id() == article_id);
        state.starts = kept;
        discarded.extend(dropped);

        for task in &discarded {
            self.release(&mut state, task);
        }
        metrics.tasks_discarded.inc_by(discarded.len() as u64);

        if state.open.contains(&article_id) {
            state.banned.insert(article_id);
        }
        if state.in_flight.contains(&article_id) {
            state.partials.entry(article_id).or_default().push_back(Task::banned(article_id));
        }
        warn!(pool = %self.name, article_id, discarded = discarded.len(), "article banned");
    }

    /// The producer gives up on `article_id` and sends nothing more for it.
    ///
    /// Lifts a ban that no `LastPartial` will ever arrive to lift.
    pub fn close(&self, article_id: ArticleId) {
        let mut state = self.state.lock();
        state.banned.remove(&article_id);
        state.open.remove(&article_id);
        debug!(pool = %self.name, article_id, "article closed by producer");
    }

    /// Whether continuations of `article_id` are currently discarded
    pub fn is_banned(&self, article_id: ArticleId) -> bool {
        self.state.lock().banned.contains(&article_id)
    }

    /// Stop admitting new articles (shared with every pool on the signal)
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// Stop and interrupt blocked waits (shared with every pool on the signal)
    pub fn kill(&self) {
        self.signal.kill();
    }

    /// The producer will not submit anything more.
    ///
    /// Bans end here: no continuation is left to discard.
    pub fn finish_production(&self) {
        let mut state = self.state.lock();
        state.production_finished = true;
        for article_id in std::mem::take(&mut state.banned) {
            state.open.remove(&article_id);
        }
    }

    /// Bytes currently queued
    pub fn pooled_bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Tasks currently queued, continuations included
    pub fn queued_tasks(&self) -> usize {
        let state = self.state.lock();
        state.starts.len() + state.partials.values().map(VecDeque::len).sum::<usize>()
    }

    fn release(&self, state: &mut PoolState<T>, task: &Task<T>) {
        let bytes = task.byte_size();
        state.bytes = state.bytes.saturating_sub(bytes);
        Metrics::global().pipeline.pooled_bytes.sub(bytes as i64);
    }
}
