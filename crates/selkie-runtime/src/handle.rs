//! Host facade and per-actor client
//!
//! `ActorHost` wires factories into a dispatcher and runs it; `ActorClient`
//! is the cloneable handle call sites hold for one actor instance.

use crate::actor::ActorFactory;
use crate::dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
use bytes::Bytes;
use selkie_core::{ActorId, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Builder for an [`ActorHost`]
#[derive(Default)]
pub struct ActorHostBuilder {
    factories: Vec<Arc<dyn ActorFactory>>,
    config: DispatcherConfig,
}

impl ActorHostBuilder {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ActorFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the dispatcher loop on its own task
    pub fn start(self) -> ActorHost {
        let mut dispatcher = Dispatcher::new(self.factories, self.config);
        let handle = dispatcher.handle();
        let task = tokio::spawn(async move {
            dispatcher.run().await;
        });
        info!("actor host started");
        ActorHost { handle, task }
    }
}

/// A running actor host
pub struct ActorHost {
    handle: DispatcherHandle,
    task: JoinHandle<()>,
}

impl ActorHost {
    pub fn builder() -> ActorHostBuilder {
        ActorHostBuilder::new()
    }

    /// Handle for one actor instance
    pub fn client(&self, actor_id: ActorId) -> ActorClient {
        ActorClient {
            actor_id,
            handle: self.handle.clone(),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Deactivate every actor and stop the dispatcher
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        let _ = self.task.await;
        Ok(())
    }
}

/// Cloneable handle to one actor instance
#[derive(Clone)]
pub struct ActorClient {
    actor_id: ActorId,
    handle: DispatcherHandle,
}

impl ActorClient {
    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Invoke a raw operation
    pub async fn invoke(&self, operation: impl Into<String>, payload: Bytes) -> Result<Bytes> {
        self.handle
            .invoke(self.actor_id.clone(), operation, payload)
            .await
    }

    /// Invoke with a JSON request and response
    pub async fn invoke_json<Req, Resp>(
        &self,
        operation: impl Into<String>,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)
            .map_err(|e| selkie_core::Error::serialization_failed(e.to_string()))?;
        let response = self.invoke(operation, Bytes::from(payload)).await?;
        serde_json::from_slice(&response)
            .map_err(|e| selkie_core::Error::deserialization_failed(e.to_string()))
    }

    /// Deactivate the instance, flushing its state
    pub async fn deactivate(&self) -> Result<()> {
        self.handle.deactivate(self.actor_id.clone()).await
    }
}
