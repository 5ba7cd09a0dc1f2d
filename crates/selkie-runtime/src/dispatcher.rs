//! Message dispatcher for the actor host
//!
//! Routes invocations to actor cells, activating instances on first use.
//! The dispatcher loop only routes: actual actor work happens on the cells'
//! own tasks, so one slow actor never stalls the others.

use crate::actor::ActorFactory;
use crate::mailbox::{ActorCell, Envelope};
use bytes::Bytes;
use selkie_core::constants::{
    ACTOR_ACTIVE_COUNT_MAX, INVOCATION_PENDING_COUNT_MAX, MAILBOX_DEPTH_MAX,
};
use selkie_core::{ActorId, Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently active actors
    pub max_actors: usize,
    /// Maximum pending invocations per actor before callers are rejected
    pub max_pending_per_actor: usize,
    /// Mailbox depth per actor cell
    pub mailbox_capacity: usize,
    /// Buffer size of the dispatcher command channel
    pub command_buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_actors: ACTOR_ACTIVE_COUNT_MAX,
            max_pending_per_actor: INVOCATION_PENDING_COUNT_MAX,
            mailbox_capacity: MAILBOX_DEPTH_MAX,
            command_buffer_size: 1024,
        }
    }
}

/// Commands sent to the dispatcher
enum DispatcherCommand {
    Invoke {
        actor_id: ActorId,
        operation: String,
        payload: Bytes,
        reply_tx: oneshot::Sender<Result<Bytes>>,
    },
    Deactivate {
        actor_id: ActorId,
        reply_tx: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Guard that decrements a pending counter on drop
struct PendingGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloneable handle for sending work to the dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<DispatcherCommand>,
    /// Pending invocation count per actor, shared with the dispatcher
    pending_counts: Arc<Mutex<HashMap<String, Arc<AtomicUsize>>>>,
    max_pending_per_actor: usize,
}

impl DispatcherHandle {
    /// Invoke an actor and wait for its reply.
    ///
    /// Rejects up front when the actor already has too many pending
    /// invocations. Backpressure belongs at the edge, not in the queue.
    pub async fn invoke(
        &self,
        actor_id: ActorId,
        operation: impl Into<String>,
        payload: Bytes,
    ) -> Result<Bytes> {
        let key = actor_id.qualified_name();

        let counter = {
            let mut counts = self.pending_counts.lock().unwrap();
            counts
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone()
        };

        let current = counter.fetch_add(1, Ordering::SeqCst);
        if current >= self.max_pending_per_actor {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::MailboxFull {
                id: key,
                depth: current,
                max: self.max_pending_per_actor,
            });
        }
        let _guard = PendingGuard { counter };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(DispatcherCommand::Invoke {
                actor_id,
                operation: operation.into(),
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed {
                name: "dispatcher".into(),
            })?;

        reply_rx.await.map_err(|_| Error::ChannelClosed {
            name: "dispatcher reply".into(),
        })?
    }

    /// Deactivate an actor, flushing its state, and wait for completion
    pub async fn deactivate(&self, actor_id: ActorId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(DispatcherCommand::Deactivate { actor_id, reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed {
                name: "dispatcher".into(),
            })?;
        reply_rx.await.map_err(|_| Error::ChannelClosed {
            name: "dispatcher reply".into(),
        })?
    }

    /// Stop the dispatcher, deactivating every active actor
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(DispatcherCommand::Shutdown)
            .await
            .map_err(|_| Error::ChannelClosed {
                name: "dispatcher".into(),
            })
    }
}

/// Routes invocations to actor cells, owning activation and deactivation
pub struct Dispatcher {
    factories: HashMap<String, Arc<dyn ActorFactory>>,
    config: DispatcherConfig,
    cells: HashMap<String, ActorCell>,
    command_rx: mpsc::Receiver<DispatcherCommand>,
    command_tx: mpsc::Sender<DispatcherCommand>,
    pending_counts: Arc<Mutex<HashMap<String, Arc<AtomicUsize>>>>,
}

impl Dispatcher {
    pub fn new(factories: Vec<Arc<dyn ActorFactory>>, config: DispatcherConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size);
        let factories = factories
            .into_iter()
            .map(|f| (f.kind().to_string(), f))
            .collect();

        Self {
            factories,
            config,
            cells: HashMap::new(),
            command_rx,
            command_tx,
            pending_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            command_tx: self.command_tx.clone(),
            pending_counts: self.pending_counts.clone(),
            max_pending_per_actor: self.config.max_pending_per_actor,
        }
    }

    /// Run the dispatcher loop until shutdown
    #[instrument(skip(self), level = "info")]
    pub async fn run(&mut self) {
        info!("dispatcher starting");

        while let Some(command) = self.command_rx.recv().await {
            match command {
                DispatcherCommand::Invoke {
                    actor_id,
                    operation,
                    payload,
                    reply_tx,
                } => {
                    let envelope = Envelope {
                        operation,
                        payload,
                        reply_tx,
                    };
                    self.route(actor_id, envelope).await;
                }
                DispatcherCommand::Deactivate { actor_id, reply_tx } => {
                    let result = self.deactivate(&actor_id).await;
                    let _ = reply_tx.send(result);
                }
                DispatcherCommand::Shutdown => {
                    info!(active = self.cells.len(), "dispatcher shutting down");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// Route one envelope, activating the target on first use
    async fn route(&mut self, actor_id: ActorId, envelope: Envelope) {
        let key = actor_id.qualified_name();

        if !self.cells.contains_key(&key) {
            match self.activate(&actor_id).await {
                Ok(cell) => {
                    self.cells.insert(key.clone(), cell);
                }
                Err(e) => {
                    let _ = envelope.reply_tx.send(Err(e));
                    return;
                }
            }
        }

        // Cell was just ensured above
        if let Some(cell) = self.cells.get(&key) {
            cell.enqueue(envelope);
        }
    }

    #[instrument(skip(self), fields(actor_id = %actor_id), level = "debug")]
    async fn activate(&mut self, actor_id: &ActorId) -> Result<ActorCell> {
        if self.cells.len() >= self.config.max_actors {
            return Err(Error::internal(format!(
                "active actor limit reached: {}",
                self.config.max_actors
            )));
        }

        let factory = self
            .factories
            .get(actor_id.kind())
            .ok_or_else(|| Error::actor_not_found(format!("no factory for kind {}", actor_id.kind())))?;

        let mut actor = factory.create(actor_id);
        actor.on_activate().await?;
        debug!(actor_id = %actor_id, "actor activated");

        Ok(ActorCell::spawn(
            actor_id.clone(),
            actor,
            self.config.mailbox_capacity,
        ))
    }

    async fn deactivate(&mut self, actor_id: &ActorId) -> Result<()> {
        let key = actor_id.qualified_name();
        let result = match self.cells.remove(&key) {
            Some(cell) => {
                let result = cell.stop().await;
                if let Err(e) = &result {
                    warn!(actor_id = %actor_id, error = %e, "deactivation failed");
                } else {
                    debug!(actor_id = %actor_id, "actor deactivated");
                }
                result
            }
            None => Ok(()),
        };
        self.drop_idle_counter(&key);
        result
    }

    /// Drop the pending counter for a deactivated actor once it reaches
    /// zero; in-flight invocations keep their own Arc and re-insert on the
    /// next call.
    fn drop_idle_counter(&self, key: &str) {
        let mut counts = self.pending_counts.lock().unwrap();
        if counts
            .get(key)
            .is_some_and(|counter| counter.load(Ordering::SeqCst) == 0)
        {
            counts.remove(key);
        }
    }

    async fn shutdown(&mut self) {
        for (key, cell) in self.cells.drain() {
            if let Err(e) = cell.stop().await {
                warn!(actor = %key, error = %e, "deactivation failed during shutdown");
            }
        }
    }

    pub fn active_actor_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_active(&self, actor_id: &ActorId) -> bool {
        self.cells.contains_key(&actor_id.qualified_name())
    }
}
