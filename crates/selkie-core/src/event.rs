//! Event model
//!
//! Pure data contracts for the append-only log. An event is an immutable
//! fact carrying a strictly sequential version; the timestamp exists only
//! for range-scoped reads and never participates in ordering.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};

/// Version and creation time of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBasicInfo {
    /// Strictly sequential version, exactly previous + 1
    pub version: u64,
    /// Wall-clock creation time in milliseconds since epoch
    pub timestamp_ms: u64,
}

impl EventBasicInfo {
    pub fn new(version: u64, timestamp_ms: u64) -> Self {
        Self {
            version,
            timestamp_ms,
        }
    }
}

/// A fully addressed event: payload plus version info plus owning actor
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyEvent<E> {
    pub actor_id: ActorId,
    pub info: EventBasicInfo,
    pub event: E,
}

impl<E> FullyEvent<E> {
    pub fn new(actor_id: ActorId, info: EventBasicInfo, event: E) -> Self {
        Self {
            actor_id,
            info,
            event,
        }
    }
}

/// Idempotency token attached when raising an event
///
/// For a given `uid` string at most one event may ever be durably appended
/// for the actor; stores treat `(actor_id, uid)` as a uniqueness constraint
/// and report the collision as a distinct duplicate outcome, not a write
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUid {
    pub uid: String,
    pub timestamp_ms: u64,
    /// Code of the event this one was derived from, if any
    pub from_event: String,
    /// Actor that produced the originating event
    pub from_actor: String,
    /// Version of the originating event
    pub from_version: u64,
}

impl EventUid {
    /// Build a uid derived from another actor's event, the usual shape for
    /// observer-driven follow-up commands.
    pub fn derived(
        uid: impl Into<String>,
        timestamp_ms: u64,
        from_event: impl Into<String>,
        from_actor: impl Into<String>,
        from_version: u64,
    ) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ms,
            from_event: from_event.into(),
            from_actor: from_actor.into(),
            from_version,
        }
    }

    /// Build a bare uid with no originating event
    pub fn bare(uid: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ms,
            from_event: String::new(),
            from_actor: String::new(),
            from_version: 0,
        }
    }
}
