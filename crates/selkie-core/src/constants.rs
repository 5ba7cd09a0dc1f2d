//! Framework constants
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum length of an actor ID in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an actor kind in bytes
pub const ACTOR_KIND_LENGTH_BYTES_MAX: usize = 128;

/// Maximum depth of an actor mailbox
pub const MAILBOX_DEPTH_MAX: usize = 10_000;

/// Maximum number of pending invocations per actor
pub const INVOCATION_PENDING_COUNT_MAX: usize = 1000;

/// Maximum number of concurrently active actors in one host
pub const ACTOR_ACTIVE_COUNT_MAX: usize = 100_000;

// =============================================================================
// Snapshot Cadence
// =============================================================================

/// Events between periodic snapshot saves for source actors
pub const SNAPSHOT_VERSION_INTERVAL_DEFAULT: u64 = 500;

/// Minimum accumulated events before a forced save on deactivation
pub const SNAPSHOT_MIN_VERSION_INTERVAL_DEFAULT: u64 = 1;

/// Events between periodic snapshot saves for observer actors.
/// Observers keep this small so replay on redelivery stays cheap.
pub const OBSERVER_SNAPSHOT_VERSION_INTERVAL_DEFAULT: u64 = 20;

// =============================================================================
// Archiving
// =============================================================================

/// Minimum seconds between archives (interval trigger, AND-ed with versions)
pub const ARCHIVE_SECONDS_INTERVAL_DEFAULT: u64 = 24 * 60 * 60;

/// Minimum versions between archives (interval trigger, AND-ed with seconds)
pub const ARCHIVE_VERSION_INTERVAL_DEFAULT: u64 = 500;

/// Seconds ceiling that forces an archive on its own
pub const ARCHIVE_SECONDS_INTERVAL_MAX_DEFAULT: u64 = 7 * 24 * 60 * 60;

/// Version ceiling that forces an archive on its own
pub const ARCHIVE_VERSION_INTERVAL_MAX_DEFAULT: u64 = 5000;

/// Archives that must accumulate past a range before its raw events may be
/// cleared. Protects idempotency windows that may still re-derive from them.
pub const ARCHIVE_RETAINED_SNAPSHOT_RECORDS_MIN_DEFAULT: u64 = 3;

// =============================================================================
// Transactions
// =============================================================================

/// Per-step transaction timeout in milliseconds (30 sec)
pub const TRANSACTION_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

/// Retention for finished commit records in milliseconds (24 h)
pub const COMMIT_RETENTION_MS_DEFAULT: u64 = 24 * 60 * 60 * 1000;

// =============================================================================
// Bus / Fan-out
// =============================================================================

/// Maximum events drained into one consumer batch
pub const BUS_BATCH_COUNT_MAX_DEFAULT: usize = 1000;

/// Maximum milliseconds a partial batch waits before draining
pub const BUS_BATCH_DELAY_MS_MAX_DEFAULT: u64 = 100;

/// Maximum publish attempts before a publish is declared fatal
pub const PUBLISH_RETRY_COUNT_MAX_DEFAULT: u32 = 10;

/// Backoff between publish retries in milliseconds (linear)
pub const PUBLISH_RETRY_BACKOFF_MS_DEFAULT: u64 = 200;

/// Starting per-consumer concurrency/prefetch level
pub const CONSUMER_CONCURRENCY_MIN_DEFAULT: usize = 1;

/// Ceiling for per-consumer concurrency/prefetch level
pub const CONSUMER_CONCURRENCY_MAX_DEFAULT: usize = 64;

/// Milliseconds without failures before concurrency expands one step
pub const CONSUMER_HEALTHY_PERIOD_MS_DEFAULT: u64 = 5 * 1000;

/// Number of logical partitions in the in-memory broker
pub const BROKER_PARTITION_COUNT_DEFAULT: usize = 16;
