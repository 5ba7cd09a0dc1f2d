//! Configuration for Selkie
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Selkie
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelkieConfig {
    /// Event-sourcing cadence configuration
    #[serde(default)]
    pub sourcing: SourcingOptions,

    /// Event archiving configuration
    #[serde(default)]
    pub archive: ArchiveOptions,

    /// Notification bus configuration
    #[serde(default)]
    pub bus: BusOptions,

    /// Distributed transaction configuration
    #[serde(default)]
    pub transaction: TransactionOptions,
}

impl SelkieConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.sourcing.validate()?;
        self.archive.validate()?;
        self.bus.validate()?;
        self.transaction.validate()?;
        Ok(())
    }
}

/// Snapshot cadence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingOptions {
    /// Events between periodic snapshot saves
    #[serde(default = "default_snapshot_version_interval")]
    pub snapshot_version_interval: u64,

    /// Minimum accumulated events before a forced save on deactivation
    #[serde(default = "default_snapshot_min_version_interval")]
    pub snapshot_min_version_interval: u64,

    /// Snapshot interval for observer actors (kept small so replay on
    /// redelivery stays cheap)
    #[serde(default = "default_observer_snapshot_version_interval")]
    pub observer_snapshot_version_interval: u64,
}

fn default_snapshot_version_interval() -> u64 {
    SNAPSHOT_VERSION_INTERVAL_DEFAULT
}

fn default_snapshot_min_version_interval() -> u64 {
    SNAPSHOT_MIN_VERSION_INTERVAL_DEFAULT
}

fn default_observer_snapshot_version_interval() -> u64 {
    OBSERVER_SNAPSHOT_VERSION_INTERVAL_DEFAULT
}

impl Default for SourcingOptions {
    fn default() -> Self {
        Self {
            snapshot_version_interval: default_snapshot_version_interval(),
            snapshot_min_version_interval: default_snapshot_min_version_interval(),
            observer_snapshot_version_interval: default_observer_snapshot_version_interval(),
        }
    }
}

impl SourcingOptions {
    fn validate(&self) -> Result<()> {
        if self.snapshot_version_interval == 0 {
            return Err(Error::InvalidConfiguration {
                field: "sourcing.snapshot_version_interval".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.observer_snapshot_version_interval == 0 {
            return Err(Error::InvalidConfiguration {
                field: "sourcing.observer_snapshot_version_interval".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// What happens to raw events once their range is archived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClearPolicy {
    /// Move covered events to the archive table
    #[default]
    Transfer,
    /// Delete covered events outright
    Delete,
    /// Keep raw events in place
    Retain,
}

/// Event archiving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOptions {
    /// Whether archiving runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Minimum seconds since last archive (AND-ed with version interval)
    #[serde(default = "default_archive_seconds_interval")]
    pub seconds_interval: u64,

    /// Minimum versions since last archive (AND-ed with seconds interval)
    #[serde(default = "default_archive_version_interval")]
    pub version_interval: u64,

    /// Seconds ceiling that forces an archive on its own
    #[serde(default = "default_archive_seconds_interval_max")]
    pub seconds_interval_max: u64,

    /// Version ceiling that forces an archive on its own
    #[serde(default = "default_archive_version_interval_max")]
    pub version_interval_max: u64,

    /// Raw event disposition once a range is archived
    #[serde(default)]
    pub event_clear: EventClearPolicy,

    /// Newer archives required before a range's raw events may be cleared
    #[serde(default = "default_retained_snapshot_records_min")]
    pub retained_snapshot_records_min: u64,
}

fn default_archive_seconds_interval() -> u64 {
    ARCHIVE_SECONDS_INTERVAL_DEFAULT
}

fn default_archive_version_interval() -> u64 {
    ARCHIVE_VERSION_INTERVAL_DEFAULT
}

fn default_archive_seconds_interval_max() -> u64 {
    ARCHIVE_SECONDS_INTERVAL_MAX_DEFAULT
}

fn default_archive_version_interval_max() -> u64 {
    ARCHIVE_VERSION_INTERVAL_MAX_DEFAULT
}

fn default_retained_snapshot_records_min() -> u64 {
    ARCHIVE_RETAINED_SNAPSHOT_RECORDS_MIN_DEFAULT
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            seconds_interval: default_archive_seconds_interval(),
            version_interval: default_archive_version_interval(),
            seconds_interval_max: default_archive_seconds_interval_max(),
            version_interval_max: default_archive_version_interval_max(),
            event_clear: EventClearPolicy::default(),
            retained_snapshot_records_min: default_retained_snapshot_records_min(),
        }
    }
}

impl ArchiveOptions {
    fn validate(&self) -> Result<()> {
        if self.seconds_interval_max < self.seconds_interval {
            return Err(Error::InvalidConfiguration {
                field: "archive.seconds_interval_max".into(),
                reason: "must be >= seconds_interval".into(),
            });
        }
        if self.version_interval_max < self.version_interval {
            return Err(Error::InvalidConfiguration {
                field: "archive.version_interval_max".into(),
                reason: "must be >= version_interval".into(),
            });
        }
        if self.enabled && self.version_interval == 0 {
            return Err(Error::InvalidConfiguration {
                field: "archive.version_interval".into(),
                reason: "must be at least 1 when archiving is enabled".into(),
            });
        }
        Ok(())
    }
}

/// Notification bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusOptions {
    /// Maximum events drained into one consumer batch
    #[serde(default = "default_batch_count_max")]
    pub batch_count_max: usize,

    /// Maximum milliseconds a partial batch waits before draining
    #[serde(default = "default_batch_delay_ms_max")]
    pub batch_delay_ms_max: u64,

    /// Maximum publish attempts before the publish is declared fatal
    #[serde(default = "default_publish_retry_count_max")]
    pub publish_retry_count_max: u32,

    /// Backoff between publish retries in milliseconds (linear)
    #[serde(default = "default_publish_retry_backoff_ms")]
    pub publish_retry_backoff_ms: u64,

    /// Starting consumer concurrency/prefetch level
    #[serde(default = "default_consumer_concurrency_min")]
    pub consumer_concurrency_min: usize,

    /// Consumer concurrency/prefetch ceiling
    #[serde(default = "default_consumer_concurrency_max")]
    pub consumer_concurrency_max: usize,

    /// Milliseconds without failures before concurrency expands one step
    #[serde(default = "default_consumer_healthy_period_ms")]
    pub consumer_healthy_period_ms: u64,
}

fn default_batch_count_max() -> usize {
    BUS_BATCH_COUNT_MAX_DEFAULT
}

fn default_batch_delay_ms_max() -> u64 {
    BUS_BATCH_DELAY_MS_MAX_DEFAULT
}

fn default_publish_retry_count_max() -> u32 {
    PUBLISH_RETRY_COUNT_MAX_DEFAULT
}

fn default_publish_retry_backoff_ms() -> u64 {
    PUBLISH_RETRY_BACKOFF_MS_DEFAULT
}

fn default_consumer_concurrency_min() -> usize {
    CONSUMER_CONCURRENCY_MIN_DEFAULT
}

fn default_consumer_concurrency_max() -> usize {
    CONSUMER_CONCURRENCY_MAX_DEFAULT
}

fn default_consumer_healthy_period_ms() -> u64 {
    CONSUMER_HEALTHY_PERIOD_MS_DEFAULT
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            batch_count_max: default_batch_count_max(),
            batch_delay_ms_max: default_batch_delay_ms_max(),
            publish_retry_count_max: default_publish_retry_count_max(),
            publish_retry_backoff_ms: default_publish_retry_backoff_ms(),
            consumer_concurrency_min: default_consumer_concurrency_min(),
            consumer_concurrency_max: default_consumer_concurrency_max(),
            consumer_healthy_period_ms: default_consumer_healthy_period_ms(),
        }
    }
}

impl BusOptions {
    fn validate(&self) -> Result<()> {
        if self.batch_count_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "bus.batch_count_max".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.consumer_concurrency_min == 0 {
            return Err(Error::InvalidConfiguration {
                field: "bus.consumer_concurrency_min".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.consumer_concurrency_max < self.consumer_concurrency_min {
            return Err(Error::InvalidConfiguration {
                field: "bus.consumer_concurrency_max".into(),
                reason: "must be >= consumer_concurrency_min".into(),
            });
        }
        Ok(())
    }
}

/// Distributed transaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Per-step timeout in milliseconds
    #[serde(default = "default_transaction_timeout_ms")]
    pub timeout_ms: u64,

    /// Retention for finished commit records in milliseconds
    #[serde(default = "default_commit_retention_ms")]
    pub commit_retention_ms: u64,
}

fn default_transaction_timeout_ms() -> u64 {
    TRANSACTION_TIMEOUT_MS_DEFAULT
}

fn default_commit_retention_ms() -> u64 {
    COMMIT_RETENTION_MS_DEFAULT
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_transaction_timeout_ms(),
            commit_retention_ms: default_commit_retention_ms(),
        }
    }
}

impl TransactionOptions {
    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "transaction.timeout_ms".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
