//! Consumer host
//!
//! Runs the fan-out for every partition of a broker under one consumer
//! group. Each partition gets a reader task (broker cursor, prefetch sized
//! by the qos controller) and a processor task (decode, deliver through the
//! observer unit container, commit). Strict in-order per partition: a poison
//! event or failing handler halts its partition on a health loop with the
//! committed offset and checkpoints untouched, while other partitions keep
//! flowing.

use crate::channel::{batch_channel, BatchReceiver, BatchSender};
use crate::memory::{MemoryBroker, PartitionConsumer};
use crate::qos::QosController;
use crate::unit::ObserverUnitContainer;
use bytes::Bytes;
use selkie_core::{BusOptions, EventEnvelope, Result, TimeProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Fan-out host over every partition of one broker
pub struct ConsumerHost {
    broker: Arc<MemoryBroker>,
    container: Arc<ObserverUnitContainer>,
    group: String,
    options: BusOptions,
    time: Arc<dyn TimeProvider>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    partition_healthy: Vec<Arc<AtomicBool>>,
}

impl ConsumerHost {
    pub fn new(
        broker: Arc<MemoryBroker>,
        container: Arc<ObserverUnitContainer>,
        group: impl Into<String>,
        options: BusOptions,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            container,
            group: group.into(),
            options,
            time,
            shutdown_tx,
            tasks: Vec::new(),
            partition_healthy: Vec::new(),
        }
    }

    /// Spawn reader + processor tasks for every partition
    #[instrument(skip(self), fields(group = %self.group), level = "info")]
    pub fn start(&mut self) {
        debug_assert!(self.tasks.is_empty(), "host already started");
        info!(partitions = self.broker.partition_count(), "consumer host starting");

        for partition in 0..self.broker.partition_count() {
            let healthy = Arc::new(AtomicBool::new(true));
            self.partition_healthy.push(healthy.clone());

            let qos = Arc::new(Mutex::new(QosController::new(
                &self.options,
                self.time.now_ms(),
            )));
            let (batch_tx, batch_rx) = batch_channel(
                self.options.batch_count_max,
                self.options.batch_count_max,
                self.options.batch_delay_ms_max,
            );

            let reader = tokio::spawn(run_reader(
                self.broker.consumer(partition, self.group.clone()),
                batch_tx,
                qos.clone(),
                self.shutdown_tx.subscribe(),
            ));
            let processor = tokio::spawn(run_processor(
                self.broker.consumer(partition, self.group.clone()),
                batch_rx,
                self.container.clone(),
                self.options.clone(),
                self.time.clone(),
                qos,
                healthy,
                self.shutdown_tx.subscribe(),
            ));
            self.tasks.push(reader);
            self.tasks.push(processor);
        }
    }

    /// True when no partition is halted on a failing event
    pub fn is_healthy(&self) -> bool {
        self.partition_healthy
            .iter()
            .all(|h| h.load(Ordering::SeqCst))
    }

    /// Signal shutdown and wait for every partition task to exit
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        futures::future::join_all(self.tasks.drain(..)).await;
        info!(group = %self.group, "consumer host stopped");
    }
}

/// Pull entries from the broker cursor and feed the batching channel.
///
/// Prefetch size follows the qos controller; backpressure comes from the
/// bounded channel when the processor is halted or slow.
async fn run_reader(
    consumer: PartitionConsumer,
    batch_tx: BatchSender<(u64, Bytes)>,
    qos: Arc<Mutex<QosController>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut cursor = consumer.committed().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = consumer.wait_for_new(cursor) => {}
        }

        let prefetch = qos.lock().unwrap().current();
        let batch = consumer.read_batch(cursor, prefetch).await;
        for payload in batch {
            if batch_tx.send((cursor, payload)).await.is_err() {
                return;
            }
            cursor += 1;
        }
    }
}

/// Decode, deliver, and commit entries in strict partition order
#[allow(clippy::too_many_arguments)]
async fn run_processor(
    consumer: PartitionConsumer,
    mut batch_rx: BatchReceiver<(u64, Bytes)>,
    container: Arc<ObserverUnitContainer>,
    options: BusOptions,
    time: Arc<dyn TimeProvider>,
    qos: Arc<Mutex<QosController>>,
    healthy: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let batch = tokio::select! {
            _ = shutdown_rx.changed() => return,
            batch = batch_rx.recv_batch() => match batch {
                Some(batch) => batch,
                None => return,
            },
        };

        for (offset, payload) in batch {
            // Health loop: the same entry is retried until it delivers.
            // Nothing is skipped and nothing past it is committed.
            loop {
                let result = match EventEnvelope::from_bytes(&payload) {
                    Ok(envelope) => container.deliver(&envelope).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        consumer.commit(offset + 1).await;
                        qos.lock().unwrap().record_success(time.now_ms());
                        healthy.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        qos.lock().unwrap().record_failure(time.now_ms());
                        if healthy.swap(false, Ordering::SeqCst) {
                            error!(
                                partition = consumer.partition(),
                                offset,
                                error = %e,
                                "delivery failed, partition halted"
                            );
                        } else {
                            warn!(
                                partition = consumer.partition(),
                                offset,
                                error = %e,
                                "delivery retry failed"
                            );
                        }
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            _ = time.sleep_ms(options.consumer_healthy_period_ms) => {}
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::EventProducer;
    use crate::unit::{ObserverHandler, VersionGap};
    use async_trait::async_trait;
    use selkie_core::{ActorId, Error, WallClockTime};
    use selkie_storage::MemoryObserverSnapshotStore;
    use std::sync::atomic::AtomicU64;

    struct CountingHandler {
        name: String,
        delivered: Arc<AtomicU64>,
        poison_version: Option<u64>,
    }

    #[async_trait]
    impl ObserverHandler for CountingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
            if self.poison_version == Some(envelope.version) {
                return Err(Error::internal("cannot process"));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(actor: &ActorId, version: u64) -> EventEnvelope {
        EventEnvelope {
            kind: actor.kind().to_string(),
            actor_id: actor.clone(),
            version,
            timestamp_ms: version,
            code: "account.topped_up".into(),
            payload: vec![],
        }
    }

    fn test_options() -> BusOptions {
        BusOptions {
            batch_count_max: 16,
            batch_delay_ms_max: 5,
            consumer_healthy_period_ms: 10,
            ..Default::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_end_to_end_fanout() {
        let broker = Arc::new(MemoryBroker::new(4));
        let time: Arc<dyn TimeProvider> = Arc::new(WallClockTime::new());
        let container = Arc::new(ObserverUnitContainer::new(
            Arc::new(MemoryObserverSnapshotStore::new()),
            time.clone(),
        ));

        let delivered = Arc::new(AtomicU64::new(0));
        container
            .register(
                "account",
                "db",
                Arc::new(CountingHandler {
                    name: "sync".into(),
                    delivered: delivered.clone(),
                    poison_version: None,
                }),
            )
            .await;

        let actor = ActorId::new("account", "a-1").unwrap();
        for v in 1..=5 {
            let bytes = envelope(&actor, v).to_bytes().unwrap();
            broker
                .publish(&actor.qualified_name(), Bytes::from(bytes))
                .await
                .unwrap();
        }

        let mut host = ConsumerHost::new(
            broker.clone(),
            container,
            "fanout",
            test_options(),
            time,
        );
        host.start();

        let delivered_watch = delivered.clone();
        wait_until(move || delivered_watch.load(Ordering::SeqCst) == 5).await;
        assert!(host.is_healthy());
        host.stop().await;
    }

    #[tokio::test]
    async fn test_poison_halts_partition_and_holds_offset() {
        let broker = Arc::new(MemoryBroker::new(1));
        let time: Arc<dyn TimeProvider> = Arc::new(WallClockTime::new());
        let checkpoints = Arc::new(MemoryObserverSnapshotStore::new());
        let container = Arc::new(ObserverUnitContainer::new(checkpoints, time.clone()));

        let delivered = Arc::new(AtomicU64::new(0));
        container
            .register(
                "account",
                "db",
                Arc::new(CountingHandler {
                    name: "sync".into(),
                    delivered: delivered.clone(),
                    poison_version: Some(2),
                }),
            )
            .await;

        let actor = ActorId::new("account", "a-1").unwrap();
        for v in 1..=3 {
            let bytes = envelope(&actor, v).to_bytes().unwrap();
            broker
                .publish(&actor.qualified_name(), Bytes::from(bytes))
                .await
                .unwrap();
        }

        let mut host = ConsumerHost::new(
            broker.clone(),
            container,
            "fanout",
            test_options(),
            time,
        );
        host.start();

        // Version 1 delivers, version 2 wedges the partition
        let host_watch = delivered.clone();
        wait_until(move || host_watch.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!host.is_healthy());
        assert_eq!(delivered.load(Ordering::SeqCst), 1, "version 3 never jumps the queue");
        host.stop().await;

        // Only version 1 was committed
        let consumer = broker.consumer(0, "fanout");
        assert_eq!(consumer.committed().await, 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_does_not_advance() {
        let broker = Arc::new(MemoryBroker::new(1));
        let time: Arc<dyn TimeProvider> = Arc::new(WallClockTime::new());
        let container = Arc::new(ObserverUnitContainer::new(
            Arc::new(MemoryObserverSnapshotStore::new()),
            time.clone(),
        ));

        broker
            .publish("k", Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let mut host = ConsumerHost::new(
            broker.clone(),
            container,
            "fanout",
            test_options(),
            time,
        );
        host.start();

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(!host.is_healthy());
        host.stop().await;

        let consumer = broker.consumer(0, "fanout");
        assert_eq!(consumer.committed().await, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_confirms_versions() {
        let broker = Arc::new(MemoryBroker::new(1));
        let time: Arc<dyn TimeProvider> = Arc::new(WallClockTime::new());
        let checkpoints = Arc::new(MemoryObserverSnapshotStore::new());
        let container = Arc::new(ObserverUnitContainer::new(checkpoints.clone(), time.clone()));

        let delivered = Arc::new(AtomicU64::new(0));
        container
            .register(
                "account",
                "db",
                Arc::new(CountingHandler {
                    name: "sync".into(),
                    delivered: delivered.clone(),
                    poison_version: None,
                }),
            )
            .await;

        let actor = ActorId::new("account", "a-1").unwrap();
        for v in 1..=4 {
            let bytes = envelope(&actor, v).to_bytes().unwrap();
            broker
                .publish(&actor.qualified_name(), Bytes::from(bytes))
                .await
                .unwrap();
        }

        let mut host = ConsumerHost::new(
            broker.clone(),
            container.clone(),
            "fanout",
            test_options(),
            time,
        );
        host.start();
        let watch = delivered.clone();
        wait_until(move || watch.load(Ordering::SeqCst) == 4).await;
        host.stop().await;

        let gap = container
            .check_version("db", &actor, 4)
            .await
            .unwrap();
        assert_eq!(gap, VersionGap::AlreadySeen);
    }
}
