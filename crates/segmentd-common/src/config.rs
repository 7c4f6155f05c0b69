//! Configuration types for segmentd
//!
//! Every field has a default so a partial TOML file (or none at all) plus
//! environment overrides is enough to start the service.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for segmentd
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Retention job configuration
    pub retention: RetentionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject settings the retention scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, job) in self.retention.jobs() {
            if !job.enabled {
                continue;
            }
            if job.batch_size == 0 {
                return Err(ConfigError::ZeroBatchSize(name));
            }
            if job.interval_secs == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.retention.log_retention_months == 0 {
            return Err(ConfigError::ZeroLogRetention);
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the redb database file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./segmentd-data/segments.redb"),
        }
    }
}

/// Settings for one periodic purge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Run this job from `segmentd run`
    pub enabled: bool,
    /// Seconds between passes
    pub interval_secs: u64,
    /// Maximum rows removed per pass
    pub batch_size: u64,
}

impl JobConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 1000,
        }
    }
}

/// Retention configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Physical removal of soft-deleted segments
    pub segments: JobConfig,
    /// Removal of memberships past their TTL
    pub links: JobConfig,
    /// Removal of audit entries past the retention window
    pub logs: JobConfig,
    /// Audit entries older than this many months are purged
    pub log_retention_months: u32,
}

impl RetentionConfig {
    /// Jobs by name, in a fixed order
    #[must_use]
    pub const fn jobs(&self) -> [(&'static str, JobConfig); 3] {
        [
            ("segments", self.segments),
            ("links", self.links),
            ("logs", self.logs),
        ]
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            segments: JobConfig {
                batch_size: 100,
                ..JobConfig::default()
            },
            links: JobConfig::default(),
            logs: JobConfig {
                interval_secs: 60 * 60,
                ..JobConfig::default()
            },
            log_retention_months: 3,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `segmentd_store=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
