//! Selkie Core
//!
//! Core types, errors, and configuration for the Selkie event-sourced
//! virtual actor framework.
//!
//! # Overview
//!
//! Selkie builds stateful services out of addressable, effectively
//! single-threaded actors whose durable state is an append-only event log.
//! This crate holds the pure data contracts shared by every other crate:
//! the snapshot/event model, the event codec and registry, configuration,
//! and the error taxonomy.

pub mod actor;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod io;
pub mod snapshot;
pub mod telemetry;

pub use actor::ActorId;
pub use codec::{EventCodec, EventEnvelope, EventRegistry};
pub use config::{
    ArchiveOptions, BusOptions, EventClearPolicy, SelkieConfig, SourcingOptions,
    TransactionOptions,
};
pub use constants::*;
pub use error::{Error, Result};
pub use event::{EventBasicInfo, EventUid, FullyEvent};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use snapshot::{BriefArchive, ObserverSnapshot, Snapshot, SnapshotBase, TransactionMark};
pub use telemetry::{init_telemetry, TelemetryConfig};
