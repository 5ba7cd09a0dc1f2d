//! Selkie Bus
//!
//! The notification fan-out engine. Committed events leave the sourcing
//! engine as [`selkie_core::EventEnvelope`] bytes and travel through a
//! partitioned broker to named observer groups, each of which keeps its own
//! checkpoint against the observable actor.
//!
//! # Delivery contract
//!
//! - Per-actor order is preserved inside a partition (the actor's qualified
//!   name is the partition hash key).
//! - Delivery is at-least-once; observer checkpoints make redelivery an
//!   idempotent no-op.
//! - An event that no handler of a group can process halts that partition
//!   (strict in-order, nothing is skipped); the checkpoint and committed
//!   offset stay put until a retry succeeds.

pub mod channel;
pub mod consumer;
pub mod memory;
pub mod producer;
pub mod qos;
pub mod unit;

pub use channel::{batch_channel, BatchReceiver, BatchSender};
pub use consumer::ConsumerHost;
pub use memory::{MemoryBroker, PartitionConsumer};
pub use producer::{EventProducer, RetryingProducer};
pub use qos::QosController;
pub use unit::{EventIgnore, ObserverGroup, ObserverHandler, ObserverUnit, ObserverUnitContainer, VersionGap};
