//! In-memory storage backends
//!
//! For tests and local runs. Same contracts as production backends,
//! including the uid uniqueness constraint on append.

use crate::archive_store::ArchiveStore;
use crate::commit_store::{CommitRecord, CommitStore, TransactionStatus};
use crate::event_store::{AppendOutcome, EventRecord, EventStore};
use crate::snapshot_store::{
    ObserverSnapshotRecord, ObserverSnapshotStore, SnapshotRecord, SnapshotStore,
};
use async_trait::async_trait;
use selkie_core::{ActorId, BriefArchive, Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

// =============================================================================
// Event store
// =============================================================================

#[derive(Debug, Default)]
struct ActorLog {
    events: Vec<EventRecord>,
    uids: HashSet<String>,
    archived: Vec<EventRecord>,
    last_version: u64,
}

/// In-memory event store
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    data: Arc<RwLock<HashMap<String, ActorLog>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-archived) events for an actor
    pub async fn live_count(&self, actor_id: &ActorId) -> usize {
        let data = self.data.read().await;
        data.get(&actor_id.qualified_name())
            .map(|log| log.events.len())
            .unwrap_or(0)
    }

    /// Number of events moved to the archive table for an actor
    pub async fn archived_count(&self, actor_id: &ActorId) -> usize {
        let data = self.data.read().await;
        data.get(&actor_id.qualified_name())
            .map(|log| log.archived.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome> {
        let mut data = self.data.write().await;
        let log = data.entry(record.actor_id.qualified_name()).or_default();

        if let Some(uid) = &record.uid {
            if log.uids.contains(uid) {
                return Ok(AppendOutcome::Duplicate);
            }
        }

        if record.version != log.last_version + 1 {
            return Err(Error::version_conflict(
                record.actor_id.qualified_name(),
                log.last_version + 1,
                record.version,
            ));
        }

        if let Some(uid) = &record.uid {
            log.uids.insert(uid.clone());
        }
        log.last_version = record.version;
        log.events.push(record.clone());

        Ok(AppendOutcome::Appended)
    }

    async fn get_list(
        &self,
        actor_id: &ActorId,
        from_timestamp_ms: u64,
        start_version: u64,
        end_version: u64,
    ) -> Result<Vec<EventRecord>> {
        let data = self.data.read().await;
        Ok(data
            .get(&actor_id.qualified_name())
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| {
                        e.version >= start_version
                            && e.version <= end_version
                            && e.timestamp_ms >= from_timestamp_ms
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_list_by_type(
        &self,
        actor_id: &ActorId,
        code: &str,
        start_version: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let data = self.data.read().await;
        Ok(data
            .get(&actor_id.qualified_name())
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| e.version >= start_version && e.code == code)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_range(&self, actor_id: &ActorId, end_version: u64) -> Result<u64> {
        let mut data = self.data.write().await;
        let Some(log) = data.get_mut(&actor_id.qualified_name()) else {
            return Ok(0);
        };
        let before = log.events.len();
        log.events.retain(|e| e.version > end_version);
        Ok((before - log.events.len()) as u64)
    }

    async fn move_to_archive(&self, actor_id: &ActorId, end_version: u64) -> Result<u64> {
        let mut data = self.data.write().await;
        let Some(log) = data.get_mut(&actor_id.qualified_name()) else {
            return Ok(0);
        };
        let (moved, kept): (Vec<_>, Vec<_>) = log
            .events
            .drain(..)
            .partition(|e| e.version <= end_version);
        let count = moved.len() as u64;
        log.archived.extend(moved);
        log.events = kept;
        Ok(count)
    }
}

/// Event store decorator that fails a configured number of appends
///
/// Used by tests to inject storage faults mid-scenario.
pub struct FlakyEventStore {
    inner: Arc<dyn EventStore>,
    fail_remaining: AtomicU32,
}

impl FlakyEventStore {
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `count` appends fail with a transient storage error
    pub fn fail_next_appends(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::storage_failed("append", "injected fault"));
        }
        self.inner.append(record).await
    }

    async fn get_list(
        &self,
        actor_id: &ActorId,
        from_timestamp_ms: u64,
        start_version: u64,
        end_version: u64,
    ) -> Result<Vec<EventRecord>> {
        self.inner
            .get_list(actor_id, from_timestamp_ms, start_version, end_version)
            .await
    }

    async fn get_list_by_type(
        &self,
        actor_id: &ActorId,
        code: &str,
        start_version: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        self.inner
            .get_list_by_type(actor_id, code, start_version, limit)
            .await
    }

    async fn delete_range(&self, actor_id: &ActorId, end_version: u64) -> Result<u64> {
        self.inner.delete_range(actor_id, end_version).await
    }

    async fn move_to_archive(&self, actor_id: &ActorId, end_version: u64) -> Result<u64> {
        self.inner.move_to_archive(actor_id, end_version).await
    }
}

// =============================================================================
// Snapshot stores
// =============================================================================

/// In-memory snapshot store
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    data: Arc<RwLock<HashMap<String, SnapshotRecord>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, actor_id: &ActorId) -> Result<Option<SnapshotRecord>> {
        let data = self.data.read().await;
        Ok(data.get(&actor_id.qualified_name()).cloned())
    }

    async fn insert(&self, record: &SnapshotRecord) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(record.actor_id.qualified_name(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &SnapshotRecord) -> Result<()> {
        // Last-writer-wins: update and insert are the same operation here
        self.insert(record).await
    }

    async fn delete(&self, actor_id: &ActorId) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(&actor_id.qualified_name());
        Ok(())
    }
}

/// In-memory observer checkpoint store
#[derive(Clone, Default)]
pub struct MemoryObserverSnapshotStore {
    data: Arc<RwLock<HashMap<(String, String), ObserverSnapshotRecord>>>,
}

impl MemoryObserverSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObserverSnapshotStore for MemoryObserverSnapshotStore {
    async fn get(
        &self,
        group: &str,
        actor_id: &ActorId,
    ) -> Result<Option<ObserverSnapshotRecord>> {
        let data = self.data.read().await;
        Ok(data
            .get(&(group.to_string(), actor_id.qualified_name()))
            .cloned())
    }

    async fn upsert(&self, group: &str, record: &ObserverSnapshotRecord) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(
            (group.to_string(), record.actor_id.qualified_name()),
            record.clone(),
        );
        Ok(())
    }
}

// =============================================================================
// Archive store
// =============================================================================

/// In-memory archive record store
#[derive(Clone, Default)]
pub struct MemoryArchiveStore {
    data: Arc<RwLock<HashMap<String, Vec<BriefArchive>>>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn insert(&self, actor_id: &ActorId, archive: &BriefArchive) -> Result<()> {
        let mut data = self.data.write().await;
        let archives = data.entry(actor_id.qualified_name()).or_default();
        if let Some(last) = archives.last() {
            // Ranges must stay contiguous and non-overlapping
            if archive.start_version != last.end_version + 1 || archive.index != last.index + 1 {
                return Err(Error::storage_failed(
                    "archive insert",
                    format!(
                        "non-contiguous archive: last end {} index {}, new start {} index {}",
                        last.end_version, last.index, archive.start_version, archive.index
                    ),
                ));
            }
        }
        archives.push(archive.clone());
        Ok(())
    }

    async fn update(&self, actor_id: &ActorId, archive: &BriefArchive) -> Result<()> {
        let mut data = self.data.write().await;
        let archives = data
            .get_mut(&actor_id.qualified_name())
            .ok_or_else(|| Error::storage_failed("archive update", "no archives for actor"))?;
        let slot = archives
            .iter_mut()
            .find(|a| a.id == archive.id)
            .ok_or_else(|| Error::storage_failed("archive update", "unknown archive id"))?;
        *slot = archive.clone();
        Ok(())
    }

    async fn list(&self, actor_id: &ActorId) -> Result<Vec<BriefArchive>> {
        let data = self.data.read().await;
        Ok(data
            .get(&actor_id.qualified_name())
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Commit store
// =============================================================================

/// In-memory transaction commit record store
#[derive(Clone, Default)]
pub struct MemoryCommitStore {
    data: Arc<RwLock<HashMap<String, CommitRecord>>>,
}

impl MemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records ordered by creation time, for inspection in tests
    pub async fn list(&self) -> Vec<CommitRecord> {
        let data = self.data.read().await;
        let mut records: Vec<CommitRecord> = data.values().cloned().collect();
        records.sort_by_key(|r| r.created_at_ms);
        records
    }
}

#[async_trait]
impl CommitStore for MemoryCommitStore {
    async fn insert(&self, record: &CommitRecord) -> Result<()> {
        let mut data = self.data.write().await;
        if data.contains_key(&record.transaction_id) {
            return Err(Error::storage_failed(
                "commit insert",
                format!("transaction {} already exists", record.transaction_id),
            ));
        }
        data.insert(record.transaction_id.clone(), record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        finished_at_ms: u64,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let record = data
            .get_mut(transaction_id)
            .ok_or_else(|| Error::storage_failed("commit update", "unknown transaction"))?;
        if record.status.is_terminal() {
            return Err(Error::storage_failed(
                "commit update",
                format!("transaction {} already terminal", transaction_id),
            ));
        }
        record.status = status;
        if status.is_terminal() {
            record.finished_at_ms = Some(finished_at_ms);
        }
        Ok(())
    }

    async fn get(&self, transaction_id: &str) -> Result<Option<CommitRecord>> {
        let data = self.data.read().await;
        Ok(data.get(transaction_id).cloned())
    }

    async fn delete_finished_before(&self, timestamp_ms: u64) -> Result<u64> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, r| match (r.status.is_terminal(), r.finished_at_ms) {
            (true, Some(finished)) => finished >= timestamp_ms,
            _ => true,
        });
        Ok((before - data.len()) as u64)
    }
}
