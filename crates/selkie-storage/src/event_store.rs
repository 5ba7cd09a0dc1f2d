//! Event store contract
//!
//! Append-only event log keyed by actor id and version. Versions are the
//! sole ordering key; timestamps only scope range reads.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{ActorId, Result};

/// One persisted event row
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub actor_id: ActorId,
    /// Strictly sequential per actor, gapless
    pub version: u64,
    pub timestamp_ms: u64,
    /// Stable event code resolving the payload type
    pub code: String,
    pub payload: Bytes,
    /// Idempotency token; `(actor_id, uid)` is unique when present
    pub uid: Option<String>,
}

/// Result of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The event is now durable
    Appended,
    /// The uniqueness token was already used; nothing was written.
    /// This is the designed idempotency signal, not an error.
    Duplicate,
}

/// Append-only event storage backend
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event.
    ///
    /// A uniqueness-token collision returns [`AppendOutcome::Duplicate`];
    /// a version collision or any other failure is an error. Implementations
    /// must make the uid check and the write atomic.
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome>;

    /// Read events ordered by version, `start_version..=end_version`,
    /// skipping rows older than `from_timestamp_ms`.
    async fn get_list(
        &self,
        actor_id: &ActorId,
        from_timestamp_ms: u64,
        start_version: u64,
        end_version: u64,
    ) -> Result<Vec<EventRecord>>;

    /// Read up to `limit` events of one code, ordered by version, starting
    /// at `start_version`.
    async fn get_list_by_type(
        &self,
        actor_id: &ActorId,
        code: &str,
        start_version: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    /// Delete events with `version <= end_version`. Returns rows removed.
    async fn delete_range(&self, actor_id: &ActorId, end_version: u64) -> Result<u64>;

    /// Move events with `version <= end_version` to the archive table.
    /// Returns rows moved.
    async fn move_to_archive(&self, actor_id: &ActorId, end_version: u64) -> Result<u64>;
}
