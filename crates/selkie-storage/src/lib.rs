//! Selkie Storage
//!
//! Storage adapter contracts for Selkie actors, plus in-memory reference
//! backends for tests and local runs.
//!
//! # Overview
//!
//! The cores never talk to a database directly; they depend on the traits in
//! this crate. Production backends (SQL, document stores) implement the same
//! contracts externally. The one non-negotiable behavior is that a
//! uniqueness-token collision on append is reported as a distinct
//! [`AppendOutcome::Duplicate`] value, never as a generic write failure.
//! That signal is the idempotency mechanism for every at-least-once
//! redelivery path.

pub mod archive_store;
pub mod commit_store;
pub mod event_store;
pub mod memory;
pub mod snapshot_store;

pub use archive_store::ArchiveStore;
pub use commit_store::{CommitRecord, CommitStore, TransactionStatus};
pub use event_store::{AppendOutcome, EventRecord, EventStore};
pub use memory::{
    FlakyEventStore, MemoryArchiveStore, MemoryCommitStore, MemoryEventStore,
    MemoryObserverSnapshotStore, MemorySnapshotStore,
};
pub use snapshot_store::{
    ObserverSnapshotRecord, ObserverSnapshotStore, SnapshotRecord, SnapshotStore,
};
