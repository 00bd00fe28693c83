//! Configuration management for the revision store
//!
//! This module handles all configuration settings. Values are passed
//! explicitly into each component's constructor; nothing here is global.

use crate::constants::{
    DEFAULT_CACHE_BYTE_LIMIT, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MINIMUM_MATCH_LENGTH,
    DEFAULT_POOL_BYTE_LIMIT, DEFAULT_POOL_TASK_LIMIT, DEFAULT_TASK_BYTE_CEILING,
};
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delta building configuration
    pub diff: DiffConfig,

    /// Binary codec configuration
    pub codec: CodecConfig,

    /// Pipeline scheduling configuration
    pub pipeline: PipelineConfig,

    /// Reconstruction engine configuration
    pub reconstruction: ReconstructionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Delta building configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Revisions per full-revision checkpoint
    pub checkpoint_interval: u32,

    /// Minimum length of a matched block inside the changed region
    pub minimum_match_length: usize,

    /// Replay every built diff and compare with the target text
    pub verify_diffs: bool,
}

/// Character encoding used for text fields on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextCharset {
    /// UTF-8
    Utf8,
    /// ISO-8859-1
    Latin1,
}

impl TextCharset {
    /// Human readable charset name
    pub fn name(self) -> &'static str {
        match self {
            TextCharset::Utf8 => "UTF-8",
            TextCharset::Latin1 => "ISO-8859-1",
        }
    }
}

/// Binary codec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Enable general-purpose compression of encoded diffs
    pub compression: bool,

    /// Compression level (0-9)
    pub compression_level: u32,

    /// Character encoding of text fields
    pub charset: TextCharset,
}

/// Pipeline scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum bytes of revision text per task
    pub task_byte_ceiling: usize,

    /// Bytes a pool may hold before reporting `CacheLimitReached`
    pub pool_byte_limit: usize,

    /// Queued tasks a pool may hold before reporting `TaskLimitReached`
    pub pool_task_limit: usize,

    /// Number of delta-building worker threads (0 = auto-detect)
    pub diff_workers: usize,

    /// Number of writer threads
    pub writer_workers: usize,

    /// Base interval of a blocked wait
    #[serde(with = "duration_str")]
    pub wait_interval: Duration,

    /// Consecutive empty waits before a stage is declared stalled
    pub max_empty_waits: u32,
}

/// Reconstruction engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Byte budget of each article's reconstruction cache
    pub cache_byte_limit: usize,

    /// Base interval between attempts to fetch a delta range
    #[serde(with = "duration_str")]
    pub wait_interval: Duration,

    /// Consecutive incomplete fetches before giving up
    pub max_empty_waits: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            minimum_match_length: DEFAULT_MINIMUM_MATCH_LENGTH,
            verify_diffs: true,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: true,
            compression_level: 6,
            charset: TextCharset::Utf8,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            task_byte_ceiling: DEFAULT_TASK_BYTE_CEILING,
            pool_byte_limit: DEFAULT_POOL_BYTE_LIMIT,
            pool_task_limit: DEFAULT_POOL_TASK_LIMIT,
            diff_workers: 0, // Auto-detect
            writer_workers: 1,
            wait_interval: Duration::from_millis(20),
            max_empty_waits: 3000,
        }
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            cache_byte_limit: DEFAULT_CACHE_BYTE_LIMIT,
            wait_interval: Duration::from_millis(10),
            max_empty_waits: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config file
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file first
        if std::path::Path::new("wiki-revisions.toml").exists() {
            config = Self::from_file("wiki-revisions.toml")?;
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(interval) = env::var("WR_CHECKPOINT_INTERVAL") {
            self.diff.checkpoint_interval = interval
                .parse()
                .map_err(|e| Error::config(format!("Invalid checkpoint interval: {}", e)))?;
        }

        if let Ok(min_len) = env::var("WR_MINIMUM_MATCH_LENGTH") {
            self.diff.minimum_match_length = min_len
                .parse()
                .map_err(|e| Error::config(format!("Invalid minimum match length: {}", e)))?;
        }

        if let Ok(compression) = env::var("WR_COMPRESSION") {
            self.codec.compression = compression
                .parse()
                .map_err(|e| Error::config(format!("Invalid compression flag: {}", e)))?;
        }

        if let Ok(charset) = env::var("WR_CHARSET") {
            self.codec.charset = match charset.to_ascii_lowercase().as_str() {
                "utf8" | "utf-8" => TextCharset::Utf8,
                "latin1" | "iso-8859-1" => TextCharset::Latin1,
                other => return Err(Error::config(format!("Unsupported charset: {}", other))),
            };
        }

        if let Ok(ceiling) = env::var("WR_TASK_BYTE_CEILING") {
            self.pipeline.task_byte_ceiling = ceiling
                .parse()
                .map_err(|e| Error::config(format!("Invalid task byte ceiling: {}", e)))?;
        }

        if let Ok(workers) = env::var("WR_DIFF_WORKERS") {
            self.pipeline.diff_workers = workers
                .parse()
                .map_err(|e| Error::config(format!("Invalid diff workers: {}", e)))?;
        }

        if let Ok(waits) = env::var("WR_MAX_EMPTY_WAITS") {
            self.pipeline.max_empty_waits = waits
                .parse()
                .map_err(|e| Error::config(format!("Invalid max empty waits: {}", e)))?;
        }

        // Logging overrides
        if let Ok(level) = env::var("WR_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("WR_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.diff.checkpoint_interval == 0 {
            return Err(Error::config("Checkpoint interval must be at least 1"));
        }

        if self.diff.minimum_match_length == 0 {
            return Err(Error::config("Minimum match length must be at least 1"));
        }

        if self.codec.compression_level > 9 {
            return Err(Error::config("Compression level must be between 0 and 9"));
        }

        if self.pipeline.task_byte_ceiling == 0 {
            return Err(Error::config("Task byte ceiling must be positive"));
        }

        if self.pipeline.writer_workers == 0 {
            return Err(Error::config("At least one writer worker is required"));
        }

        if self.pipeline.diff_workers > 1024 {
            return Err(Error::config("Too many diff workers (maximum 1024)"));
        }

        if self.pipeline.max_empty_waits == 0 || self.reconstruction.max_empty_waits == 0 {
            return Err(Error::config("Max empty waits must be at least 1"));
        }

        // Anything the subscriber accepts as a filter
        EnvFilter::try_new(&self.logging.level)
            .map_err(|e| Error::config(format!("Invalid log level '{}': {}", self.logging.level, e)))?;

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }

    /// Get optimal number of diff worker threads
    pub fn optimal_diff_workers(&self) -> usize {
        if self.pipeline.diff_workers == 0 {
            // Auto-detect: use number of CPU cores
            num_cpus::get().max(1)
        } else {
            self.pipeline.diff_workers
        }
    }
}

/// Serde adapter storing durations as strings like `"30s"` or `"20ms"`
mod duration_str {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string like '30s' or '5m'")
            }

            fn visit_str<E>(self, value: &str) -> Result<Duration, E>
            where
                E: de::Error,
            {
                super::parse_duration(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

// Simple duration parser for common formats
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        // Try parsing as raw seconds
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.diff.checkpoint_interval, DEFAULT_CHECKPOINT_INTERVAL);
        assert!(config.optimal_diff_workers() >= 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.diff.checkpoint_interval = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.codec.compression_level = 12;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "wiki_revisions=loud".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_log_directives_accepted() {
        let mut config = Config::default();
        for level in ["warn", "wiki_revisions=debug", "wiki_revisions::pipeline=trace,info"] {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{}", level);
        }
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[diff]
checkpoint_interval = 50

[codec]
charset = "latin1"
compression = false

[pipeline]
wait_interval = "5ms"
max_empty_waits = 10
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.diff.checkpoint_interval, 50);
        assert_eq!(config.diff.minimum_match_length, DEFAULT_MINIMUM_MATCH_LENGTH);
        assert_eq!(config.codec.charset, TextCharset::Latin1);
        assert!(!config.codec.compression);
        assert_eq!(config.pipeline.wait_interval, Duration::from_millis(5));
        assert_eq!(config.pipeline.max_empty_waits, 10);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[diff]\ncheckpoint_interval = 0").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
    }
}
