//! Event codec, type-code registry, and wire envelope
//!
//! Event payloads travel as bytes; the stable string code persisted next to
//! them is what resolves a payload back to a concrete type. Resolution is a
//! compile-time match on a closed event enum per actor type, with no runtime
//! type inspection on the hot path. The registry exists so a process can
//! declare every (kind, code) pair once at startup and catch collisions or
//! unknown codes loudly instead of at replay time.

use crate::actor::ActorId;
use crate::error::{Error, Result};
use crate::event::{EventBasicInfo, FullyEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Byte codec for one actor type's closed event enum
///
/// Implementations match on `code` in `decode` and return
/// [`Error::UnknownEventCode`] for anything unmatched. A persisted code that
/// no longer maps to a known variant is a deployment/schema mismatch and must
/// surface, never be skipped.
pub trait EventCodec: Sized + Send + Sync {
    /// Stable string code for this event, persisted alongside the payload
    fn event_code(&self) -> &'static str;

    /// Serialize the event payload
    fn encode(&self) -> Result<Vec<u8>>;

    /// Resolve `code` and deserialize the payload
    fn decode(code: &str, bytes: &[u8]) -> Result<Self>;
}

/// Process-scoped registry of (actor kind, event code) pairs
///
/// Built once by explicit registration calls during startup configuration
/// and passed by reference to components that need code resolution. Never a
/// global static.
#[derive(Debug, Default)]
pub struct EventRegistry {
    /// code -> owning actor kind
    codes: HashMap<String, String>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code for an actor kind.
    ///
    /// Idempotent for the same (kind, code) pair; registering the same code
    /// under a different kind is a configuration error.
    pub fn register(&mut self, kind: impl Into<String>, code: impl Into<String>) -> Result<()> {
        let kind = kind.into();
        let code = code.into();

        match self.codes.get(&code) {
            Some(existing) if *existing != kind => Err(Error::InvalidConfiguration {
                field: format!("event code {}", code),
                reason: format!("already registered for kind {}", existing),
            }),
            _ => {
                self.codes.insert(code, kind);
                Ok(())
            }
        }
    }

    /// Resolve the actor kind owning a code
    pub fn kind_of(&self, code: &str) -> Result<&str> {
        self.codes
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownEventCode { code: code.into() })
    }

    /// Check whether a code is known
    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    /// Number of registered codes
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Wire shape of one committed event on the notification bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Observable actor kind (selects the observer units)
    pub kind: String,
    pub actor_id: ActorId,
    pub version: u64,
    pub timestamp_ms: u64,
    /// Stable event code resolving the payload type
    pub code: String,
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization_failed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::deserialization_failed(e.to_string()))
    }

    /// Decode the payload into a typed event
    pub fn decode_event<E: EventCodec>(&self) -> Result<FullyEvent<E>> {
        let event = E::decode(&self.code, &self.payload)?;
        Ok(FullyEvent::new(
            self.actor_id.clone(),
            EventBasicInfo::new(self.version, self.timestamp_ms),
            event,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum TestEvent {
        Added { amount: u64 },
        Removed { amount: u64 },
    }

    impl EventCodec for TestEvent {
        fn event_code(&self) -> &'static str {
            match self {
                TestEvent::Added { .. } => "test.added",
                TestEvent::Removed { .. } => "test.removed",
            }
        }

        fn encode(&self) -> Result<Vec<u8>> {
            serde_json::to_vec(self).map_err(|e| Error::serialization_failed(e.to_string()))
        }

        fn decode(code: &str, bytes: &[u8]) -> Result<Self> {
            match code {
                "test.added" | "test.removed" => serde_json::from_slice(bytes)
                    .map_err(|e| Error::deserialization_failed(e.to_string())),
                other => Err(Error::UnknownEventCode { code: other.into() }),
            }
        }
    }

    #[test]
    fn test_registry_rejects_cross_kind_collision() {
        let mut registry = EventRegistry::new();
        registry.register("account", "test.added").unwrap();
        // Same pair again is a no-op
        registry.register("account", "test.added").unwrap();
        assert_eq!(registry.len(), 1);

        let err = registry.register("order", "test.added").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_registry_unknown_code() {
        let registry = EventRegistry::new();
        assert!(matches!(
            registry.kind_of("nope"),
            Err(Error::UnknownEventCode { .. })
        ));
    }

    #[test]
    fn test_envelope_decode_event() {
        let event = TestEvent::Added { amount: 5 };
        let envelope = EventEnvelope {
            kind: "test".into(),
            actor_id: ActorId::new("test", "t-1").unwrap(),
            version: 2,
            timestamp_ms: 1234,
            code: event.event_code().into(),
            payload: event.encode().unwrap(),
        };

        let bytes = envelope.to_bytes().unwrap();
        let back = EventEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(back, envelope);

        let full = back.decode_event::<TestEvent>().unwrap();
        assert_eq!(full.event, TestEvent::Added { amount: 5 });
        assert_eq!(full.info.version, 2);
    }

    #[test]
    fn test_envelope_unknown_code_is_fatal() {
        let envelope = EventEnvelope {
            kind: "test".into(),
            actor_id: ActorId::new("test", "t-1").unwrap(),
            version: 1,
            timestamp_ms: 0,
            code: "retired.code".into(),
            payload: vec![],
        };
        assert!(matches!(
            envelope.decode_event::<TestEvent>(),
            Err(Error::UnknownEventCode { .. })
        ));
    }
}
