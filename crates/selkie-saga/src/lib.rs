//! Selkie Saga
//!
//! Distributed transaction coordinator: a [`TransactionUnit`] runs an
//! ordered list of steps against participant actors, each step bounded by
//! a timeout, and guarantees the whole set either confirms or is
//! compensated in reverse order. The outcome is recorded as a durable
//! commit record so an operator can always answer "what happened to
//! transaction X".

pub mod unit;

pub use selkie_storage::{CommitRecord, TransactionStatus};
pub use unit::{TransactionId, TransactionStep, TransactionUnit};
