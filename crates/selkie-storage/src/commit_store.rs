//! Transaction commit record store contract

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::Result;
use serde::{Deserialize, Serialize};

/// Status of a distributed transaction
///
/// `Raised` is the only open state; `Confirmed` and `Rollback` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Raised,
    Confirmed,
    Rollback,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rollback)
    }
}

/// Durable record of one transaction unit's saga
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub transaction_id: String,
    /// Serialized caller input
    pub data: Bytes,
    pub status: TransactionStatus,
    pub created_at_ms: u64,
    /// Set when the transaction reaches a terminal status
    pub finished_at_ms: Option<u64>,
}

/// Storage for transaction commit records
#[async_trait]
pub trait CommitStore: Send + Sync {
    async fn insert(&self, record: &CommitRecord) -> Result<()>;

    /// Move a transaction to a terminal status. Updating an already-terminal
    /// record is an error.
    async fn update_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        finished_at_ms: u64,
    ) -> Result<()>;

    async fn get(&self, transaction_id: &str) -> Result<Option<CommitRecord>>;

    /// Delete terminal records finished before `timestamp_ms`. Returns rows
    /// removed.
    async fn delete_finished_before(&self, timestamp_ms: u64) -> Result<u64>;
}
