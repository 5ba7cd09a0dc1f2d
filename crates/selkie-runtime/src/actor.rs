//! Actor contract for the host
//!
//! Object-safe on purpose: the dispatcher holds actors as `Box<dyn Actor>`
//! and knows nothing about their state or events. Event-sourced actors
//! embed a [`crate::Sourcing`] engine and drive it from `invoke`.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{ActorId, Result};

/// A hosted actor instance
///
/// All methods take `&mut self`: the host guarantees at most one call is in
/// flight per instance, so implementations hold plain state without locks.
#[async_trait]
pub trait Actor: Send {
    /// Called once after creation, before the first invocation.
    ///
    /// Event-sourced actors recover their snapshot and replay here.
    async fn on_activate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one named operation
    async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes>;

    /// Called once before the instance is dropped.
    ///
    /// Event-sourced actors flush their snapshot here.
    async fn on_deactivate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds actor instances for one actor kind
pub trait ActorFactory: Send + Sync {
    /// The actor kind this factory serves
    fn kind(&self) -> &str;

    fn create(&self, id: &ActorId) -> Box<dyn Actor>;
}
