//! Event-sourcing engine
//!
//! The engine an event-sourced actor embeds: it owns the actor's snapshot,
//! appends events, applies them to in-memory state, recovers after
//! activation, and drives the snapshot and archive cadences. State is only
//! ever mutated by applying an event that is already durable.
//!
//! # Crash recovery
//!
//! `doing_version` is the sole breadcrumb. It is bumped before an append and
//! confirmed after apply, so a persisted snapshot carrying
//! `doing_version == version + 1` means a prior process died mid-raise.
//! Recovery checks the store: the event either landed (re-apply it) or never
//! did (discard the intent). Both outcomes are consistent.

use crate::archive::{clear_due, next_archive, should_archive};
use bytes::Bytes;
use selkie_bus::EventProducer;
use selkie_core::{
    ActorId, ArchiveOptions, BriefArchive, Error, EventBasicInfo, EventCodec, EventEnvelope,
    EventUid, EventClearPolicy, Result, Snapshot, SourcingOptions, TimeProvider, TransactionMark,
    WallClockTime,
};
use selkie_storage::{
    AppendOutcome, ArchiveStore, EventRecord, EventStore, SnapshotRecord, SnapshotStore,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Events read per batch during recovery replay
const REPLAY_BATCH_COUNT: u64 = 1000;

/// An actor type whose state is derived from its event log
pub trait EventSourced: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Default + Clone + Send + Sync;
    type Event: EventCodec + 'static;

    /// Actor kind, also the envelope routing key for observers
    const KIND: &'static str;

    /// Fold one event into the state.
    ///
    /// Must be pure and deterministic: replay depends on applying the same
    /// events producing the same state, every time, on every process.
    fn apply(state: &mut Self::State, event: &Self::Event, info: &EventBasicInfo);

    /// Whether this event terminates the instance (`is_over`)
    fn is_final(_event: &Self::Event) -> bool {
        false
    }
}

/// Result of a raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// Event appended and applied at `version`
    Applied { version: u64 },
    /// The uid was already spent; nothing was written or applied.
    ///
    /// A successful outcome, not an error: the fact the caller wanted
    /// recorded is durably recorded.
    Duplicate,
}

impl RaiseOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RaiseOutcome::Duplicate)
    }
}

/// What recovery had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Events replayed past the persisted snapshot
    pub replayed: u64,
    /// Whether a dangling raise intent was found and resolved
    pub repaired: bool,
}

/// Builder for a [`Sourcing`] engine
pub struct SourcingBuilder<A: EventSourced> {
    actor_id: ActorId,
    event_store: Arc<dyn EventStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    archive_store: Option<Arc<dyn ArchiveStore>>,
    producer: Option<Arc<dyn EventProducer>>,
    options: SourcingOptions,
    archive_options: ArchiveOptions,
    time: Arc<dyn TimeProvider>,
    _marker: std::marker::PhantomData<A>,
}

impl<A: EventSourced> SourcingBuilder<A> {
    pub fn new(
        actor_id: ActorId,
        event_store: Arc<dyn EventStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            actor_id,
            event_store,
            snapshot_store,
            archive_store: None,
            producer: None,
            options: SourcingOptions::default(),
            archive_options: ArchiveOptions::default(),
            time: Arc::new(WallClockTime::new()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_options(mut self, options: SourcingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_archive(mut self, store: Arc<dyn ArchiveStore>, options: ArchiveOptions) -> Self {
        self.archive_store = Some(store);
        self.archive_options = options;
        self
    }

    pub fn with_producer(mut self, producer: Arc<dyn EventProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn with_time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn build(self) -> Sourcing<A> {
        Sourcing {
            snapshot: Snapshot::new(self.actor_id.clone()),
            actor_id: self.actor_id,
            event_store: self.event_store,
            snapshot_store: self.snapshot_store,
            archive_store: self.archive_store,
            producer: self.producer,
            options: self.options,
            archive_options: self.archive_options,
            time: self.time,
            last_saved_version: 0,
            snapshot_exists: false,
            last_archive: None,
            range_start_timestamp_ms: None,
        }
    }
}

/// Event-sourcing engine for one actor instance
pub struct Sourcing<A: EventSourced> {
    actor_id: ActorId,
    snapshot: Snapshot<A::State>,
    event_store: Arc<dyn EventStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    archive_store: Option<Arc<dyn ArchiveStore>>,
    producer: Option<Arc<dyn EventProducer>>,
    options: SourcingOptions,
    archive_options: ArchiveOptions,
    time: Arc<dyn TimeProvider>,
    /// Version covered by the last persisted snapshot
    last_saved_version: u64,
    /// Whether the store holds a snapshot row (insert vs update)
    snapshot_exists: bool,
    last_archive: Option<BriefArchive>,
    /// Timestamp of the first event past the last archive, if known
    range_start_timestamp_ms: Option<u64>,
}

impl<A: EventSourced> Sourcing<A> {
    pub fn builder(
        actor_id: ActorId,
        event_store: Arc<dyn EventStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> SourcingBuilder<A> {
        SourcingBuilder::new(actor_id, event_store, snapshot_store)
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn state(&self) -> &A::State {
        &self.snapshot.state
    }

    pub fn version(&self) -> u64 {
        self.snapshot.base.version
    }

    pub fn is_over(&self) -> bool {
        self.snapshot.base.is_over
    }

    /// The open transaction mark, if any
    pub fn transaction(&self) -> Option<&TransactionMark> {
        self.snapshot.base.transaction.as_ref()
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Rebuild state from the persisted snapshot plus the event log tail.
    ///
    /// Equivalent by construction to a full replay from version 0: apply is
    /// deterministic and the tail contains exactly the events past the
    /// snapshot.
    #[instrument(skip(self), fields(actor_id = %self.actor_id), level = "debug")]
    pub async fn recover(&mut self) -> Result<RecoveryReport> {
        match self.snapshot_store.get(&self.actor_id).await? {
            Some(record) => {
                let state: A::State = serde_json::from_slice(&record.state)
                    .map_err(|e| Error::deserialization_failed(e.to_string()))?;
                self.snapshot = Snapshot {
                    base: selkie_core::SnapshotBase {
                        actor_id: record.actor_id.clone(),
                        version: record.version,
                        doing_version: record.doing_version,
                        is_latest: record.is_latest,
                        is_over: record.is_over,
                        latest_min_event_timestamp_ms: record.latest_min_event_timestamp_ms,
                        transaction: record.transaction.clone(),
                    },
                    state,
                };
                self.snapshot_exists = true;
                self.last_saved_version = record.version;
            }
            None => {
                self.snapshot = Snapshot::new(self.actor_id.clone());
                self.snapshot_exists = false;
                self.last_saved_version = 0;
            }
        }
        self.range_start_timestamp_ms = None;

        if let Some(archive_store) = &self.archive_store {
            self.last_archive = archive_store.latest(&self.actor_id).await?;
        }

        let mut repaired = false;
        if self.snapshot.base.needs_repair() {
            repaired = true;
            let doing = self.snapshot.base.doing_version;
            let from = self.snapshot.base.version + 1;
            let found = self.event_store.get_list(&self.actor_id, 0, from, doing).await?;
            for record in &found {
                self.apply_record(record)?;
            }
            if self.snapshot.base.needs_repair() {
                debug!(
                    actor_id = %self.actor_id,
                    doing_version = doing,
                    "interrupted raise never landed, discarding intent"
                );
                self.snapshot.base.abort_raise();
            } else {
                debug!(actor_id = %self.actor_id, doing_version = doing, "interrupted raise recovered from the log");
            }
        }

        let mut replayed = 0u64;
        loop {
            let from = self.snapshot.base.version + 1;
            let batch = self
                .event_store
                .get_list(
                    &self.actor_id,
                    self.snapshot.base.latest_min_event_timestamp_ms,
                    from,
                    from + REPLAY_BATCH_COUNT - 1,
                )
                .await?;
            let count = batch.len() as u64;
            for record in &batch {
                self.apply_record(record)?;
            }
            replayed += count;
            if count < REPLAY_BATCH_COUNT {
                break;
            }
        }
        self.snapshot.base.is_latest = true;

        debug!(
            actor_id = %self.actor_id,
            version = self.snapshot.base.version,
            replayed,
            repaired,
            "recovered"
        );
        Ok(RecoveryReport { replayed, repaired })
    }

    fn apply_record(&mut self, record: &EventRecord) -> Result<()> {
        debug_assert_eq!(
            record.version,
            self.snapshot.base.version + 1,
            "replay must be gapless"
        );

        let event = A::Event::decode(&record.code, &record.payload)?;
        let info = EventBasicInfo::new(record.version, record.timestamp_ms);
        A::apply(&mut self.snapshot.state, &event, &info);
        if A::is_final(&event) {
            self.snapshot.base.is_over = true;
        }

        self.snapshot.base.version = record.version;
        if record.version >= self.snapshot.base.doing_version {
            self.snapshot.base.doing_version = record.version;
        }
        self.snapshot.base.latest_min_event_timestamp_ms = record.timestamp_ms;
        if self.range_start_timestamp_ms.is_none() && record.version == self.archived_through() + 1
        {
            self.range_start_timestamp_ms = Some(record.timestamp_ms);
        }
        Ok(())
    }

    // =========================================================================
    // Raising
    // =========================================================================

    /// Append and apply one event
    pub async fn raise(&mut self, event: A::Event) -> Result<RaiseOutcome> {
        self.check_raisable("(plain raise)")?;
        self.append_and_apply(event, None).await
    }

    /// Append and apply one event under an idempotency token.
    ///
    /// A spent token yields [`RaiseOutcome::Duplicate`]: success, no write,
    /// no state change. This is what makes at-least-once redelivery safe to
    /// feed straight into raises.
    pub async fn raise_with_uid(&mut self, event: A::Event, uid: &EventUid) -> Result<RaiseOutcome> {
        self.check_raisable("(uid raise)")?;
        self.append_and_apply(event, Some(uid.uid.clone())).await
    }

    fn check_raisable(&self, attempted: &str) -> Result<()> {
        if self.snapshot.base.is_over {
            return Err(Error::ActorFinished {
                actor_id: self.actor_id.qualified_name(),
            });
        }
        if let Some(mark) = &self.snapshot.base.transaction {
            return Err(Error::TransactionBusy {
                actor_id: self.actor_id.qualified_name(),
                open: mark.transaction_id.clone(),
                attempted: attempted.to_string(),
            });
        }
        Ok(())
    }

    async fn append_and_apply(
        &mut self,
        event: A::Event,
        uid: Option<String>,
    ) -> Result<RaiseOutcome> {
        let version = self.snapshot.base.next_version();
        let timestamp_ms = self.time.now_ms();
        let payload = event.encode()?;
        let code = event.event_code().to_string();
        let record = EventRecord {
            actor_id: self.actor_id.clone(),
            version,
            timestamp_ms,
            code: code.clone(),
            payload: Bytes::from(payload.clone()),
            uid,
        };

        self.snapshot.base.begin_raise(version);
        match self.event_store.append(&record).await {
            Ok(AppendOutcome::Appended) => {}
            Ok(AppendOutcome::Duplicate) => {
                self.snapshot.base.abort_raise();
                debug!(actor_id = %self.actor_id, code, "uid already spent, raise is a no-op");
                return Ok(RaiseOutcome::Duplicate);
            }
            Err(e) => {
                self.snapshot.base.abort_raise();
                return Err(e);
            }
        }

        let info = EventBasicInfo::new(version, timestamp_ms);
        A::apply(&mut self.snapshot.state, &event, &info);
        self.snapshot.base.complete_raise(version, timestamp_ms);
        if A::is_final(&event) {
            self.snapshot.base.is_over = true;
        }
        if self.range_start_timestamp_ms.is_none() {
            self.range_start_timestamp_ms = Some(timestamp_ms);
        }

        self.publish_envelope(code, payload, version, timestamp_ms).await;

        if version - self.last_saved_version >= self.options.snapshot_version_interval {
            self.save_snapshot().await?;
        }
        self.maybe_archive(timestamp_ms).await?;

        Ok(RaiseOutcome::Applied { version })
    }

    /// Publish the envelope for observers.
    ///
    /// Awaited inside the raise so per-actor publish order matches version
    /// order on the partition. A publish failure never fails the raise: the
    /// event is already durable and observers converge by replaying the
    /// store; remediation for lost notifications is a re-publish sweep.
    async fn publish_envelope(&self, code: String, payload: Vec<u8>, version: u64, timestamp_ms: u64) {
        let Some(producer) = &self.producer else {
            return;
        };
        let envelope = EventEnvelope {
            kind: A::KIND.to_string(),
            actor_id: self.actor_id.clone(),
            version,
            timestamp_ms,
            code,
            payload,
        };
        let hash_key = self.actor_id.qualified_name();
        match envelope.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = producer.publish(&hash_key, Bytes::from(bytes)).await {
                    error!(hash_key, error = %e, "event publish failed");
                }
            }
            Err(e) => error!(hash_key, error = %e, "envelope encode failed"),
        }
    }

    // =========================================================================
    // Transactions (participant side)
    // =========================================================================

    /// Raise an event inside a distributed transaction.
    ///
    /// The first tagged raise opens the transaction and persists the mark
    /// before the event, so recovery always sees the open transaction. A
    /// different open transaction rejects with [`Error::TransactionBusy`].
    pub async fn tx_raise(&mut self, transaction_id: &str, event: A::Event) -> Result<RaiseOutcome> {
        if self.snapshot.base.is_over {
            return Err(Error::ActorFinished {
                actor_id: self.actor_id.qualified_name(),
            });
        }
        match &self.snapshot.base.transaction {
            Some(mark) if mark.transaction_id != transaction_id => {
                return Err(Error::TransactionBusy {
                    actor_id: self.actor_id.qualified_name(),
                    open: mark.transaction_id.clone(),
                    attempted: transaction_id.to_string(),
                });
            }
            Some(_) => {}
            None => {
                self.snapshot.base.transaction = Some(TransactionMark {
                    transaction_id: transaction_id.to_string(),
                    start_version: self.snapshot.base.version,
                });
                self.save_snapshot().await?;
            }
        }
        self.append_and_apply(event, None).await
    }

    /// Close the open transaction, keeping its events.
    ///
    /// Idempotent: committing a transaction that is no longer open is a
    /// successful no-op, so a coordinator crash between confirms can
    /// re-drive every participant safely.
    pub async fn tx_commit(&mut self, transaction_id: &str) -> Result<()> {
        let Some(_mark) = self.close_mark(transaction_id)? else {
            debug!(
                actor_id = %self.actor_id,
                transaction_id,
                "no open transaction, commit re-drive is a no-op"
            );
            return Ok(());
        };
        debug!(actor_id = %self.actor_id, transaction_id, "transaction committed");
        self.save_snapshot().await
    }

    /// Abort the open transaction.
    ///
    /// Events already raised under it are immutable facts; if any were
    /// applied, the caller supplies the compensating event that reverses
    /// their effect. Idempotent like [`Self::tx_commit`]: rolling back a
    /// transaction that is no longer open is a successful no-op.
    pub async fn tx_rollback(
        &mut self,
        transaction_id: &str,
        compensation: Option<A::Event>,
    ) -> Result<()> {
        let Some(mark) = self.close_mark(transaction_id)? else {
            debug!(
                actor_id = %self.actor_id,
                transaction_id,
                "no open transaction, rollback re-drive is a no-op"
            );
            return Ok(());
        };
        if self.snapshot.base.version > mark.start_version {
            match compensation {
                Some(event) => {
                    self.append_and_apply(event, None).await?;
                }
                None => warn!(
                    actor_id = %self.actor_id,
                    transaction_id,
                    "rollback without compensation, applied events stand"
                ),
            }
        }
        debug!(actor_id = %self.actor_id, transaction_id, "transaction rolled back");
        self.save_snapshot().await
    }

    /// Take the mark for `transaction_id`. `Ok(None)` when no transaction
    /// is open; a different open transaction still rejects.
    fn close_mark(&mut self, transaction_id: &str) -> Result<Option<TransactionMark>> {
        match self.snapshot.base.transaction.take() {
            Some(mark) if mark.transaction_id == transaction_id => Ok(Some(mark)),
            Some(mark) => {
                let open = mark.transaction_id.clone();
                self.snapshot.base.transaction = Some(mark);
                Err(Error::TransactionBusy {
                    actor_id: self.actor_id.qualified_name(),
                    open,
                    attempted: transaction_id.to_string(),
                })
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Snapshot & archive cadence
    // =========================================================================

    /// Save a snapshot if enough events accumulated since the last save.
    ///
    /// Deactivation uses the smaller `snapshot_min_version_interval`
    /// threshold so short-lived activations still persist their work.
    pub async fn flush(&mut self, deactivating: bool) -> Result<()> {
        let unsaved = self.snapshot.base.version - self.last_saved_version;
        let threshold = if deactivating {
            self.options.snapshot_min_version_interval
        } else {
            self.options.snapshot_version_interval
        };
        if unsaved >= threshold && unsaved > 0 {
            self.save_snapshot().await?;
        }
        Ok(())
    }

    async fn save_snapshot(&mut self) -> Result<()> {
        let state = serde_json::to_vec(&self.snapshot.state)
            .map_err(|e| Error::serialization_failed(e.to_string()))?;
        let record = SnapshotRecord {
            actor_id: self.actor_id.clone(),
            version: self.snapshot.base.version,
            doing_version: self.snapshot.base.doing_version,
            is_latest: self.snapshot.base.is_latest,
            is_over: self.snapshot.base.is_over,
            latest_min_event_timestamp_ms: self.snapshot.base.latest_min_event_timestamp_ms,
            transaction: self.snapshot.base.transaction.clone(),
            state: Bytes::from(state),
        };

        if self.snapshot_exists {
            self.snapshot_store.update(&record).await?;
        } else {
            self.snapshot_store.insert(&record).await?;
            self.snapshot_exists = true;
        }
        self.last_saved_version = self.snapshot.base.version;
        debug!(actor_id = %self.actor_id, version = record.version, "snapshot saved");
        Ok(())
    }

    fn archived_through(&self) -> u64 {
        self.last_archive.as_ref().map(|a| a.end_version).unwrap_or(0)
    }

    async fn maybe_archive(&mut self, now_ms: u64) -> Result<()> {
        let Some(archive_store) = self.archive_store.clone() else {
            return Ok(());
        };
        if !should_archive(
            self.last_archive.as_ref(),
            self.range_start_timestamp_ms,
            &self.snapshot.base,
            now_ms,
            &self.archive_options,
        ) {
            return Ok(());
        }

        // The snapshot must cover the closed range before its raw events
        // can ever be cleared
        self.save_snapshot().await?;

        let archive = next_archive(
            self.last_archive.as_ref(),
            &self.snapshot.base,
            self.range_start_timestamp_ms.unwrap_or(0),
        );
        archive_store.insert(&self.actor_id, &archive).await?;
        info!(
            actor_id = %self.actor_id,
            start_version = archive.start_version,
            end_version = archive.end_version,
            index = archive.index,
            "event range archived"
        );
        self.last_archive = Some(archive);
        self.range_start_timestamp_ms = None;

        if self.archive_options.event_clear == EventClearPolicy::Retain {
            return Ok(());
        }

        let archives = archive_store.list(&self.actor_id).await?;
        let due: Vec<BriefArchive> = clear_due(
            &archives,
            self.archive_options.retained_snapshot_records_min,
        )
        .into_iter()
        .cloned()
        .collect();

        for archive in due {
            let cleared = if self.archive_options.event_clear == EventClearPolicy::Transfer {
                self.event_store
                    .move_to_archive(&self.actor_id, archive.end_version)
                    .await?
            } else {
                self.event_store
                    .delete_range(&self.actor_id, archive.end_version)
                    .await?
            };

            let mut updated = archive;
            updated.events_cleared = true;
            archive_store.update(&self.actor_id, &updated).await?;
            debug!(
                actor_id = %self.actor_id,
                index = updated.index,
                end_version = updated.end_version,
                cleared,
                "raw events cleared for archived range"
            );
        }
        Ok(())
    }
}
