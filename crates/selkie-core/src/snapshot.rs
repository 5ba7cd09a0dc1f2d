//! Snapshot model
//!
//! Bookkeeping metadata for one actor's materialized state. The `doing_version`
//! field is the crash-recovery breadcrumb: it marks intent before persistence,
//! and a dangling value after a crash is the sole recovery signal.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};

/// Marker for an open distributed transaction on a participant actor
///
/// At most one transaction may be open per actor at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMark {
    pub transaction_id: String,
    /// Snapshot version when the transaction first touched this actor
    pub start_version: u64,
}

/// Bookkeeping metadata of one actor snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBase {
    /// Owning key
    pub actor_id: ActorId,
    /// Last applied event version, monotonically increasing, starts at 0
    pub version: u64,
    /// Version of an event being persisted but not yet confirmed applied
    pub doing_version: u64,
    /// True if reconstructed without replaying from an earlier snapshot
    pub is_latest: bool,
    /// Terminal marker: no further events may be raised once true
    pub is_over: bool,
    /// Lower bound for subsequent incremental event reads
    pub latest_min_event_timestamp_ms: u64,
    /// Open transaction, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionMark>,
}

impl SnapshotBase {
    /// Fresh base for a newly activated actor id (version 0)
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            version: 0,
            doing_version: 0,
            is_latest: true,
            is_over: false,
            latest_min_event_timestamp_ms: 0,
            transaction: None,
        }
    }

    /// Mark intent to persist the event at `version`.
    ///
    /// Must be exactly `self.version + 1`; the write is recorded before the
    /// append so a crash leaves the breadcrumb behind.
    pub fn begin_raise(&mut self, version: u64) {
        debug_assert_eq!(version, self.version + 1, "raise must be gapless");
        self.doing_version = version;
    }

    /// Confirm the event at `version` was appended and applied.
    pub fn complete_raise(&mut self, version: u64, timestamp_ms: u64) {
        debug_assert_eq!(version, self.doing_version, "completing unknown raise");
        self.version = version;
        self.doing_version = version;
        self.latest_min_event_timestamp_ms = timestamp_ms;
    }

    /// Abandon an in-flight raise (duplicate or failed append).
    pub fn abort_raise(&mut self) {
        self.doing_version = self.version;
    }

    /// True when a prior process died between append intent and confirmation.
    pub fn needs_repair(&self) -> bool {
        self.doing_version != self.version
    }

    /// Next version to assign
    pub fn next_version(&self) -> u64 {
        self.version + 1
    }
}

/// Materialized state of an actor plus bookkeeping metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub base: SnapshotBase,
    pub state: S,
}

impl<S: Default> Snapshot<S> {
    /// Fresh snapshot for first activation (empty state, version 0)
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            base: SnapshotBase::new(actor_id),
            state: S::default(),
        }
    }
}

/// Checkpoint of one observer group against one observable actor instance
///
/// `version` must never exceed the observable actor's own committed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverSnapshot {
    pub actor_id: ActorId,
    pub version: u64,
    pub doing_version: u64,
    /// When this observer first saw the actor
    pub start_timestamp_ms: u64,
}

impl ObserverSnapshot {
    pub fn new(actor_id: ActorId, start_timestamp_ms: u64) -> Self {
        Self {
            actor_id,
            version: 0,
            doing_version: 0,
            start_timestamp_ms,
        }
    }
}

/// A closed, immutable range of events rolled into a historical snapshot
///
/// Ranges are contiguous and non-overlapping per actor: `start_version` of
/// archive N+1 equals `end_version` of archive N plus one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefArchive {
    pub id: String,
    pub start_version: u64,
    pub end_version: u64,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    /// Ordinal of this archive for the actor, starting at 0
    pub index: u64,
    /// True once the covered raw events were transferred or deleted
    pub events_cleared: bool,
}
