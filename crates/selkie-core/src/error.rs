//! Error types for Selkie
//!
//! Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Event / Raise Errors
    // =========================================================================
    #[error("Version conflict: actor {actor_id}, expected {expected}, got {actual}")]
    VersionConflict {
        actor_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unknown event code: {code}")]
    UnknownEventCode { code: String },

    #[error("Actor is finished, no further events may be raised: {actor_id}")]
    ActorFinished { actor_id: String },

    // =========================================================================
    // Transaction Errors
    // =========================================================================
    #[error("Actor {actor_id} has open transaction {open}, rejecting {attempted}")]
    TransactionBusy {
        actor_id: String,
        open: String,
        attempted: String,
    },

    #[error("Transaction {transaction_id} step {step} timed out after {timeout_ms}ms")]
    TransactionTimeout {
        transaction_id: String,
        step: String,
        timeout_ms: u64,
    },

    #[error("Transaction {transaction_id} rolled back: {reason}")]
    TransactionRolledBack {
        transaction_id: String,
        reason: String,
    },

    // =========================================================================
    // Host Errors
    // =========================================================================
    #[error("Actor not found: {id}")]
    ActorNotFound { id: String },

    #[error("Invalid actor ID: {id}, reason: {reason}")]
    InvalidActorId { id: String, reason: String },

    #[error("Invalid operation: {operation}")]
    InvalidOperation { operation: String },

    #[error("Actor mailbox full: {id}, depth: {depth}, max: {max}")]
    MailboxFull {
        id: String,
        depth: usize,
        max: usize,
    },

    // =========================================================================
    // Storage / Bus Errors
    // =========================================================================
    #[error("Storage {op} failed: {reason}")]
    StorageFailed { op: String, reason: String },

    #[error("Publish failed for key {hash_key} after {attempts} attempts: {reason}")]
    PublishFailed {
        hash_key: String,
        attempts: u32,
        reason: String,
    },

    #[error("Channel closed: {name}")]
    ChannelClosed { name: String },

    // =========================================================================
    // Configuration / Serialization Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an actor not found error
    pub fn actor_not_found(id: impl Into<String>) -> Self {
        Self::ActorNotFound { id: id.into() }
    }

    /// Create a version conflict error
    pub fn version_conflict(actor_id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            actor_id: actor_id.into(),
            expected,
            actual,
        }
    }

    /// Create a storage failure error
    pub fn storage_failed(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageFailed {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization failure error
    pub fn serialization_failed(reason: impl Into<String>) -> Self {
        Self::SerializationFailed {
            reason: reason.into(),
        }
    }

    /// Create a deserialization failure error
    pub fn deserialization_failed(reason: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable.
    ///
    /// Transient storage and transport failures may be retried at the layer
    /// that owns the resource. Version conflicts and unknown codes are not
    /// retriable: they require a resync or a code/registry fix.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StorageFailed { .. } | Self::PublishFailed { .. } | Self::MailboxFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::version_conflict("bank:a-1", 3, 7);
        let msg = err.to_string();
        assert!(msg.contains("bank:a-1"));
        assert!(msg.contains('3'));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::storage_failed("append", "io").is_retriable());
        assert!(!Error::UnknownEventCode { code: "x".into() }.is_retriable());
        assert!(!Error::version_conflict("a", 1, 2).is_retriable());
    }
}
