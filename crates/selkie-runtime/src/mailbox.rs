//! Actor mailbox and cell
//!
//! Bounded queues with explicit limits, no silent drops. A cell is one
//! spawned task owning one actor instance; its mpsc receiver is the mailbox,
//! and the single consuming task is what makes actor turns single-threaded.

use crate::actor::Actor;
use bytes::Bytes;
use selkie_core::constants::MAILBOX_DEPTH_MAX;
use selkie_core::{ActorId, Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A queued invocation
#[derive(Debug)]
pub struct Envelope {
    pub operation: String,
    pub payload: Bytes,
    /// Channel the invocation result is sent back on
    pub reply_tx: oneshot::Sender<Result<Bytes>>,
}

enum CellMessage {
    Invoke(Envelope),
    Stop(oneshot::Sender<Result<()>>),
}

/// A running actor instance: one task, one mailbox
pub struct ActorCell {
    id: ActorId,
    tx: mpsc::Sender<CellMessage>,
    capacity: usize,
    task: JoinHandle<()>,
}

impl ActorCell {
    /// Spawn the cell task for an already-activated actor
    pub fn spawn(id: ActorId, actor: Box<dyn Actor>, capacity: usize) -> Self {
        debug_assert!(capacity > 0, "capacity must be positive");
        debug_assert!(
            capacity <= MAILBOX_DEPTH_MAX,
            "capacity exceeds MAILBOX_DEPTH_MAX"
        );

        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(run_cell(id.clone(), actor, rx));
        Self {
            id,
            tx,
            capacity,
            task,
        }
    }

    /// Queue an invocation without waiting.
    ///
    /// A full mailbox answers the caller through the envelope's reply
    /// channel; the dispatcher loop never blocks on one slow actor.
    pub fn enqueue(&self, envelope: Envelope) {
        match self.tx.try_send(CellMessage::Invoke(envelope)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(CellMessage::Invoke(envelope))) => {
                let _ = envelope.reply_tx.send(Err(Error::MailboxFull {
                    id: self.id.qualified_name(),
                    depth: self.capacity,
                    max: self.capacity,
                }));
            }
            Err(mpsc::error::TrySendError::Closed(CellMessage::Invoke(envelope))) => {
                let _ = envelope.reply_tx.send(Err(Error::ChannelClosed {
                    name: format!("mailbox {}", self.id),
                }));
            }
            Err(_) => {}
        }
    }

    /// Deactivate: drain queued work, run `on_deactivate`, stop the task
    pub async fn stop(self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(CellMessage::Stop(ack_tx)).await.is_err() {
            // Task already gone, nothing left to flush
            return Ok(());
        }
        let result = ack_rx.await.map_err(|_| Error::ChannelClosed {
            name: format!("mailbox {}", self.id),
        })?;
        let _ = self.task.await;
        result
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }
}

async fn run_cell(id: ActorId, mut actor: Box<dyn Actor>, mut rx: mpsc::Receiver<CellMessage>) {
    debug!(actor_id = %id, "actor cell started");

    while let Some(message) = rx.recv().await {
        match message {
            CellMessage::Invoke(envelope) => {
                let result = actor.invoke(&envelope.operation, envelope.payload).await;
                if let Err(e) = &result {
                    debug!(actor_id = %id, operation = %envelope.operation, error = %e, "invocation failed");
                }
                // Caller may have given up waiting; that is not our problem
                let _ = envelope.reply_tx.send(result);
            }
            CellMessage::Stop(ack) => {
                let result = actor.on_deactivate().await;
                if let Err(e) = &result {
                    error!(actor_id = %id, error = %e, "deactivation hook failed");
                }
                let _ = ack.send(result);
                break;
            }
        }
    }

    debug!(actor_id = %id, "actor cell stopped");
}
