//! Metrics collection for the revision store
//!
//! Prometheus counters grouped per component, registered once into a
//! crate-local registry on first use.

use crate::core::error::Result;
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Instant;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Binary codec counters
pub struct CodecMetrics {
    /// Diffs encoded
    pub diffs_encoded: IntCounter,
    /// Diffs decoded
    pub diffs_decoded: IntCounter,
    /// Bit-packed payload bytes before compression
    pub raw_bytes: IntCounter,
    /// Bytes handed to the store, marker included
    pub stored_bytes: IntCounter,
    /// Encodes where compression did not shrink the payload
    pub compression_fallbacks: IntCounter,
}

/// Reconstruction engine counters
pub struct ReconstructionMetrics {
    /// Revisions returned to callers
    pub revisions_reconstructed: IntCounter,
    /// Lookups answered from the cache
    pub cache_hits: IntCounter,
    /// Lookups that had to replay deltas
    pub cache_misses: IntCounter,
    /// Deltas decoded and replayed
    pub deltas_replayed: IntCounter,
    /// Lookups failed with a reconstruction error
    pub failures: IntCounter,
    /// Duration of replaying a delta range in seconds
    pub replay_duration: Histogram,
}

/// Pipeline scheduler counters
pub struct PipelineMetrics {
    /// Tasks accepted by a pool
    pub tasks_submitted: IntCounter,
    /// Tasks dropped because their article was banned
    pub tasks_discarded: IntCounter,
    /// Articles banned
    pub articles_banned: IntCounter,
    /// Stages that hit the empty-wait budget
    pub timeouts: IntCounter,
    /// Diffs written to the delta store
    pub diffs_written: IntCounter,
    /// Bytes currently held by all task pools
    pub pooled_bytes: IntGauge,
}

/// Centralized metrics for all components
pub struct Metrics {
    /// Codec metrics
    pub codec: CodecMetrics,
    /// Reconstruction metrics
    pub reconstruction: ReconstructionMetrics,
    /// Pipeline metrics
    pub pipeline: PipelineMetrics,
}

impl Metrics {
    /// Create and register a new metrics instance
    fn new() -> Result<Self> {
        Ok(Self {
            codec: CodecMetrics::new()?,
            reconstruction: ReconstructionMetrics::new()?,
            pipeline: PipelineMetrics::new()?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("metric definitions are static and register once"));
        &INSTANCE
    }
}

impl CodecMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            diffs_encoded: counter("wr_codec_diffs_encoded_total", "Total number of diffs encoded")?,
            diffs_decoded: counter("wr_codec_diffs_decoded_total", "Total number of diffs decoded")?,
            raw_bytes: counter("wr_codec_raw_bytes_total", "Bit-packed payload bytes before compression")?,
            stored_bytes: counter("wr_codec_stored_bytes_total", "Encoded bytes handed to the store")?,
            compression_fallbacks: counter(
                "wr_codec_compression_fallbacks_total",
                "Encodes that fell back to the raw form",
            )?,
        })
    }
}

impl ReconstructionMetrics {
    fn new() -> Result<Self> {
        let replay_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wr_reconstruction_replay_duration_seconds",
                "Duration of replaying a delta range in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        REGISTRY.register(Box::new(replay_duration.clone()))?;

        Ok(Self {
            revisions_reconstructed: counter(
                "wr_reconstruction_revisions_total",
                "Total number of revisions reconstructed",
            )?,
            cache_hits: counter("wr_reconstruction_cache_hits_total", "Lookups served from the cache")?,
            cache_misses: counter("wr_reconstruction_cache_misses_total", "Lookups that replayed deltas")?,
            deltas_replayed: counter("wr_reconstruction_deltas_replayed_total", "Deltas decoded and replayed")?,
            failures: counter("wr_reconstruction_failures_total", "Failed reconstructions")?,
            replay_duration,
        })
    }
}

impl PipelineMetrics {
    fn new() -> Result<Self> {
        let pooled_bytes = IntGauge::new("wr_pipeline_pooled_bytes", "Bytes currently held by task pools")?;
        REGISTRY.register(Box::new(pooled_bytes.clone()))?;

        Ok(Self {
            tasks_submitted: counter("wr_pipeline_tasks_submitted_total", "Tasks accepted by a pool")?,
            tasks_discarded: counter("wr_pipeline_tasks_discarded_total", "Tasks discarded by bans")?,
            articles_banned: counter("wr_pipeline_articles_banned_total", "Articles banned mid-stream")?,
            timeouts: counter("wr_pipeline_timeouts_total", "Stages that exhausted their wait budget")?,
            diffs_written: counter("wr_pipeline_diffs_written_total", "Diffs written to the delta store")?,
            pooled_bytes,
        })
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    REGISTRY.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Timer for measuring operation duration with automatic histogram recording
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: &Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Initialize the metrics registry by creating the global metrics instance
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Get the Prometheus registry holding every crate metric
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect all metrics as a Prometheus-formatted string
pub fn gather() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
