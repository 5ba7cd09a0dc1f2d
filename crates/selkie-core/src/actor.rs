//! Actor identity
//!
//! Explicit validation on construction, immutable after creation.

use crate::constants::{ACTOR_ID_LENGTH_BYTES_MAX, ACTOR_KIND_LENGTH_BYTES_MAX};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an actor
///
/// Actor IDs consist of an actor kind (the actor type's stable name, e.g.
/// `"account"`) and a primary key unique within that kind. The kind doubles
/// as the observable-stream name on the notification bus.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorId {
    kind: String,
    id: String,
}

impl ActorId {
    /// Create a new ActorId with validation
    ///
    /// # Errors
    /// Returns an error if kind or id exceeds length limits or contains
    /// invalid characters.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        let id = id.into();

        if kind.is_empty() || id.is_empty() {
            return Err(Error::InvalidActorId {
                id: format!("{}:{}", kind, id),
                reason: "kind and id must not be empty".into(),
            });
        }

        if kind.len() > ACTOR_KIND_LENGTH_BYTES_MAX {
            return Err(Error::InvalidActorId {
                id: format!("{}:{}", kind, id),
                reason: format!(
                    "kind length {} exceeds limit {}",
                    kind.len(),
                    ACTOR_KIND_LENGTH_BYTES_MAX
                ),
            });
        }

        if id.len() > ACTOR_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidActorId {
                id: format!("{}:{}", kind, id),
                reason: format!(
                    "id length {} exceeds limit {}",
                    id.len(),
                    ACTOR_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        // Alphanumeric, dash, underscore, dot
        let valid_chars = |s: &str| {
            s.chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        };

        if !valid_chars(&kind) || !valid_chars(&id) {
            return Err(Error::InvalidActorId {
                id: format!("{}:{}", kind, id),
                reason: "contains invalid characters".into(),
            });
        }

        Ok(Self { kind, id })
    }

    /// Get the actor kind
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Get the primary key
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the fully qualified name (kind:id)
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_valid() {
        let id = ActorId::new("account", "acct-123").unwrap();
        assert_eq!(id.kind(), "account");
        assert_eq!(id.id(), "acct-123");
        assert_eq!(id.qualified_name(), "account:acct-123");
    }

    #[test]
    fn test_actor_id_invalid_chars() {
        assert!(ActorId::new("account", "acct/123").is_err());
        assert!(ActorId::new("acc ount", "acct").is_err());
    }

    #[test]
    fn test_actor_id_empty() {
        assert!(ActorId::new("", "x").is_err());
        assert!(ActorId::new("x", "").is_err());
    }

    #[test]
    fn test_actor_id_too_long() {
        let long = "a".repeat(ACTOR_ID_LENGTH_BYTES_MAX + 1);
        assert!(ActorId::new("account", long).is_err());
    }

    #[test]
    fn test_actor_id_display() {
        let id = ActorId::new("ns", "id").unwrap();
        assert_eq!(format!("{}", id), "ns:id");
    }
}
