//! Observer-side engine
//!
//! Follows one event-sourced instance and folds its events into a local
//! projection, exactly once and strictly in version order. The projection
//! is persisted together with its checkpoint, so a recovering observer
//! resumes from the last saved version and replays only the tail of the
//! observable's log. The observable may have archived and cleared events
//! below the checkpoint; they are never needed again.

use bytes::Bytes;
use selkie_core::{
    ActorId, Error, EventBasicInfo, EventCodec, EventEnvelope, ObserverSnapshot, Result,
    TimeProvider, WallClockTime, OBSERVER_SNAPSHOT_VERSION_INTERVAL_DEFAULT,
};
use selkie_storage::{EventStore, ObserverSnapshotRecord, ObserverSnapshotStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Events read per batch during catch-up replay
const CATCH_UP_BATCH_COUNT: u64 = 1000;

/// A projection over another actor's event stream
pub trait Observing: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Default + Send + Sync;
    type Event: EventCodec + 'static;

    /// Observer group this projection checkpoints under
    const GROUP: &'static str;
    /// Kind of the observed actor, matched against envelope routing
    const KIND: &'static str;

    /// Fold one observed event into the projection. Must be deterministic;
    /// catch-up replays events through it after gaps and on recovery.
    fn observe(state: &mut Self::State, event: &Self::Event, info: &EventBasicInfo);
}

/// Outcome of offering one envelope to an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// The event was the strict next version and was applied
    Applied,
    /// At or below the checkpoint; an idempotent no-op.
    ///
    /// Redelivery is expected under at-least-once transport and is never
    /// an error.
    AlreadySeen,
    /// Ahead of the checkpoint; nothing was applied. The caller resyncs
    /// with [`ObserverCore::catch_up`] before retrying delivery.
    GapDetected { expected: u64, actual: u64 },
}

/// Observer engine for one (group, observed instance) pair
pub struct ObserverCore<O: Observing> {
    actor_id: ActorId,
    snapshot: ObserverSnapshot,
    state: O::State,
    checkpoints: Arc<dyn ObserverSnapshotStore>,
    time: Arc<dyn TimeProvider>,
    snapshot_version_interval: u64,
    last_saved_version: u64,
    _marker: std::marker::PhantomData<O>,
}

impl<O: Observing> ObserverCore<O> {
    pub fn new(actor_id: ActorId, checkpoints: Arc<dyn ObserverSnapshotStore>) -> Self {
        Self::with_time(actor_id, checkpoints, Arc::new(WallClockTime::new()))
    }

    pub fn with_time(
        actor_id: ActorId,
        checkpoints: Arc<dyn ObserverSnapshotStore>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let snapshot = ObserverSnapshot::new(actor_id.clone(), time.now_ms());
        Self {
            actor_id,
            snapshot,
            state: O::State::default(),
            checkpoints,
            time,
            snapshot_version_interval: OBSERVER_SNAPSHOT_VERSION_INTERVAL_DEFAULT,
            last_saved_version: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Override the checkpoint persistence cadence
    /// (`sourcing.observer_snapshot_version_interval`).
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_version_interval = interval;
        self
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn state(&self) -> &O::State {
        &self.state
    }

    /// Last observed version
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    /// Load the persisted checkpoint and projection, then replay the
    /// observable's log from the checkpoint to its current head.
    #[instrument(skip(self, event_store), fields(group = O::GROUP, actor_id = %self.actor_id), level = "debug")]
    pub async fn recover(&mut self, event_store: &dyn EventStore) -> Result<u64> {
        match self.checkpoints.get(O::GROUP, &self.actor_id).await? {
            Some(record) => {
                self.state = serde_json::from_slice(&record.state)
                    .map_err(|e| Error::deserialization_failed(e.to_string()))?;
                self.snapshot = ObserverSnapshot {
                    actor_id: record.actor_id,
                    version: record.version,
                    doing_version: record.doing_version,
                    start_timestamp_ms: record.start_timestamp_ms,
                };
                self.last_saved_version = record.version;
            }
            None => {
                self.snapshot = ObserverSnapshot::new(self.actor_id.clone(), self.time.now_ms());
                self.state = O::State::default();
                self.last_saved_version = 0;
            }
        }

        let replayed = self.catch_up(event_store).await?;
        debug!(
            group = O::GROUP,
            actor_id = %self.actor_id,
            version = self.snapshot.version,
            replayed,
            "observer recovered"
        );
        Ok(replayed)
    }

    /// Offer one live envelope.
    ///
    /// Applies it only when it is the strict next version; stale envelopes
    /// are no-ops and a gap leaves the checkpoint untouched. The checkpoint
    /// is persisted on a version cadence, never ahead of what was applied.
    pub async fn on_next(&mut self, envelope: &EventEnvelope) -> Result<Observed> {
        debug_assert_eq!(
            envelope.actor_id, self.actor_id,
            "envelope routed to the wrong observer"
        );

        let expected = self.snapshot.version + 1;
        if envelope.version < expected {
            return Ok(Observed::AlreadySeen);
        }
        if envelope.version > expected {
            debug!(
                group = O::GROUP,
                actor_id = %self.actor_id,
                expected,
                actual = envelope.version,
                "version gap, catch-up required"
            );
            return Ok(Observed::GapDetected {
                expected,
                actual: envelope.version,
            });
        }

        let event = envelope.decode_event::<O::Event>()?;
        O::observe(&mut self.state, &event.event, &event.info);
        self.snapshot.version = envelope.version;
        self.snapshot.doing_version = envelope.version;

        if self.snapshot.version - self.last_saved_version >= self.snapshot_version_interval {
            self.save_checkpoint().await?;
        }
        Ok(Observed::Applied)
    }

    /// Replay every missing version directly from the observable's event
    /// log, in batches, until the log head is reached.
    pub async fn catch_up(&mut self, event_store: &dyn EventStore) -> Result<u64> {
        let mut replayed = 0u64;
        loop {
            let from = self.snapshot.version + 1;
            let batch = event_store
                .get_list(&self.actor_id, 0, from, from + CATCH_UP_BATCH_COUNT - 1)
                .await?;
            let count = batch.len() as u64;
            for record in &batch {
                if record.version != self.snapshot.version + 1 {
                    return Err(Error::version_conflict(
                        self.actor_id.qualified_name(),
                        self.snapshot.version + 1,
                        record.version,
                    ));
                }
                let event = O::Event::decode(&record.code, &record.payload)?;
                let info = EventBasicInfo::new(record.version, record.timestamp_ms);
                O::observe(&mut self.state, &event, &info);
                self.snapshot.version = record.version;
                self.snapshot.doing_version = record.version;
            }
            replayed += count;
            if count < CATCH_UP_BATCH_COUNT {
                break;
            }
        }
        if self.snapshot.version > self.last_saved_version {
            self.save_checkpoint().await?;
        }
        Ok(replayed)
    }

    /// Persist the checkpoint regardless of cadence (deactivation path)
    pub async fn flush(&mut self) -> Result<()> {
        if self.snapshot.version != self.last_saved_version {
            self.save_checkpoint().await?;
        }
        Ok(())
    }

    async fn save_checkpoint(&mut self) -> Result<()> {
        let state = serde_json::to_vec(&self.state)
            .map_err(|e| Error::serialization_failed(e.to_string()))?;
        let record = ObserverSnapshotRecord {
            actor_id: self.snapshot.actor_id.clone(),
            version: self.snapshot.version,
            doing_version: self.snapshot.doing_version,
            start_timestamp_ms: self.snapshot.start_timestamp_ms,
            state: Bytes::from(state),
        };
        self.checkpoints.upsert(O::GROUP, &record).await?;
        self.last_saved_version = self.snapshot.version;
        Ok(())
    }
}

/// Shared-access wrapper over [`ObserverCore`].
///
/// Envelope submission may overlap from many tasks; applies are serialized
/// through the lock so the strict ordering invariant holds without the
/// callers coordinating.
pub struct ConcurrentObserverCore<O: Observing> {
    inner: Mutex<ObserverCore<O>>,
}

impl<O: Observing> ConcurrentObserverCore<O> {
    pub fn new(core: ObserverCore<O>) -> Self {
        Self {
            inner: Mutex::new(core),
        }
    }

    pub async fn recover(&self, event_store: &dyn EventStore) -> Result<u64> {
        self.inner.lock().await.recover(event_store).await
    }

    pub async fn on_next(&self, envelope: &EventEnvelope) -> Result<Observed> {
        self.inner.lock().await.on_next(envelope).await
    }

    pub async fn catch_up(&self, event_store: &dyn EventStore) -> Result<u64> {
        self.inner.lock().await.catch_up(event_store).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.lock().await.flush().await
    }

    pub async fn version(&self) -> u64 {
        self.inner.lock().await.version()
    }

    /// Read the projection under the lock
    pub async fn with_state<R>(&self, f: impl FnOnce(&O::State) -> R) -> R {
        let core = self.inner.lock().await;
        f(core.state())
    }
}
