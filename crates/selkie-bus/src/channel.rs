//! Batching channel
//!
//! Multi-producer, single-consumer channel whose consumer drains in batches:
//! a batch closes when it reaches `batch_count_max` items or when
//! `batch_delay_ms_max` elapses after the first item, whichever comes first.
//! Bounds both the per-item overhead under load and the latency of a trickle.

use selkie_core::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Sending half of a batching channel
#[derive(Clone)]
pub struct BatchSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> BatchSender<T> {
    pub async fn send(&self, item: T) -> Result<()> {
        self.tx.send(item).await.map_err(|_| Error::ChannelClosed {
            name: "batch channel".into(),
        })
    }
}

/// Receiving half of a batching channel
pub struct BatchReceiver<T> {
    rx: mpsc::Receiver<T>,
    batch_count_max: usize,
    batch_delay_ms_max: u64,
}

impl<T> BatchReceiver<T> {
    /// Receive the next batch, or `None` once all senders are gone and the
    /// channel is drained.
    pub async fn recv_batch(&mut self) -> Option<Vec<T>> {
        let first = self.rx.recv().await?;
        let deadline = Instant::now() + Duration::from_millis(self.batch_delay_ms_max);

        let mut batch = Vec::with_capacity(self.batch_count_max.min(64));
        batch.push(first);

        while batch.len() < self.batch_count_max {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(item)) => batch.push(item),
                // Senders gone or deadline hit: close the batch
                Ok(None) | Err(_) => break,
            }
        }

        Some(batch)
    }
}

/// Create a batching channel
pub fn batch_channel<T>(
    capacity: usize,
    batch_count_max: usize,
    batch_delay_ms_max: u64,
) -> (BatchSender<T>, BatchReceiver<T>) {
    debug_assert!(capacity > 0);
    debug_assert!(batch_count_max > 0);

    let (tx, rx) = mpsc::channel(capacity);
    (
        BatchSender { tx },
        BatchReceiver {
            rx,
            batch_count_max,
            batch_delay_ms_max,
        },
    )
}
