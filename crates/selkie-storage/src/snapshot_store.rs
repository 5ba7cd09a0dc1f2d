//! Snapshot store contracts
//!
//! Last-writer-wins snapshot persistence, keyed by actor id. Observer
//! checkpoints use the same shape scoped within a per-group table.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::snapshot::TransactionMark;
use selkie_core::{ActorId, Result};

/// One persisted snapshot row
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub actor_id: ActorId,
    pub version: u64,
    pub doing_version: u64,
    pub is_latest: bool,
    pub is_over: bool,
    pub latest_min_event_timestamp_ms: u64,
    pub transaction: Option<TransactionMark>,
    /// Serialized actor state
    pub state: Bytes,
}

/// Snapshot storage backend, keyed by actor id, last-writer-wins
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, actor_id: &ActorId) -> Result<Option<SnapshotRecord>>;

    async fn insert(&self, record: &SnapshotRecord) -> Result<()>;

    async fn update(&self, record: &SnapshotRecord) -> Result<()>;

    async fn delete(&self, actor_id: &ActorId) -> Result<()>;
}

/// One persisted observer checkpoint row.
///
/// Carries the serialized projection next to the checkpoint so a recovering
/// observer resumes from its last saved version instead of replaying the
/// observable's whole log, which may no longer hold its earliest events
/// once archiving has cleared them. Callers that keep no projection of
/// their own (the fan-out checkpoint gate) store empty bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverSnapshotRecord {
    pub actor_id: ActorId,
    pub version: u64,
    pub doing_version: u64,
    pub start_timestamp_ms: u64,
    /// Serialized projection state
    pub state: Bytes,
}

/// Observer checkpoint storage, keyed by (group, actor id)
#[async_trait]
pub trait ObserverSnapshotStore: Send + Sync {
    async fn get(&self, group: &str, actor_id: &ActorId)
        -> Result<Option<ObserverSnapshotRecord>>;

    async fn upsert(&self, group: &str, record: &ObserverSnapshotRecord) -> Result<()>;
}
