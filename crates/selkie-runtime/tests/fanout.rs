//! Full pipeline: an event raised through the sourcing engine is published
//! to the broker, consumed in partition order, and delivered exactly once
//! to the registered observer handlers, with checkpoints advancing only on
//! handler success.

use async_trait::async_trait;
use selkie_bus::{
    ConsumerHost, EventIgnore, MemoryBroker, ObserverHandler, ObserverUnit, ObserverUnitContainer,
};
use selkie_core::{
    ActorId, BusOptions, Error, EventBasicInfo, EventCodec, EventEnvelope, Result, WallClockTime,
};
use selkie_runtime::{EventSourced, Sourcing};
use selkie_storage::{
    MemoryEventStore, MemoryObserverSnapshotStore, MemorySnapshotStore, ObserverSnapshotStore,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CounterState {
    total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum CounterEvent {
    Added { amount: i64 },
    Audited,
}

impl EventCodec for CounterEvent {
    fn event_code(&self) -> &'static str {
        match self {
            CounterEvent::Added { .. } => "counter.added",
            CounterEvent::Audited => "counter.audited",
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization_failed(e.to_string()))
    }

    fn decode(code: &str, bytes: &[u8]) -> Result<Self> {
        match code {
            "counter.added" | "counter.audited" => serde_json::from_slice(bytes)
                .map_err(|e| Error::deserialization_failed(e.to_string())),
            other => Err(Error::UnknownEventCode { code: other.into() }),
        }
    }
}

struct Counter;

impl EventSourced for Counter {
    type State = CounterState;
    type Event = CounterEvent;
    const KIND: &'static str = "counter";

    fn apply(state: &mut CounterState, event: &CounterEvent, _info: &EventBasicInfo) {
        if let CounterEvent::Added { amount } = event {
            state.total += amount;
        }
    }
}

/// Sums delivered amounts and counts deliveries
struct SummingHandler {
    sum: AtomicI64,
    delivered: AtomicU64,
}

impl SummingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sum: AtomicI64::new(0),
            delivered: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ObserverHandler for SummingHandler {
    fn name(&self) -> &str {
        "summing"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event = CounterEvent::decode(&envelope.code, &envelope.payload)?;
        if let CounterEvent::Added { amount } = event {
            self.sum.fetch_add(amount, Ordering::SeqCst);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

fn fast_options() -> BusOptions {
    BusOptions {
        batch_count_max: 16,
        batch_delay_ms_max: 5,
        consumer_healthy_period_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_raise_fans_out_to_handlers_in_order() {
    let broker = Arc::new(MemoryBroker::new(4));
    let checkpoints = Arc::new(MemoryObserverSnapshotStore::new());
    let container = Arc::new(ObserverUnitContainer::new(
        checkpoints.clone(),
        Arc::new(WallClockTime::new()),
    ));

    let handler = SummingHandler::new();
    let mut unit = ObserverUnit::new("counter");
    unit.register("reporting", handler.clone());
    container.install(unit).await;

    let mut consumer = ConsumerHost::new(
        broker.clone(),
        container.clone(),
        "reporting",
        fast_options(),
        Arc::new(WallClockTime::new()),
    );
    consumer.start();

    let actor = ActorId::new("counter", "c-1").unwrap();
    let mut engine: Sourcing<Counter> = Sourcing::builder(
        actor.clone(),
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemorySnapshotStore::new()),
    )
    .with_producer(broker.clone())
    .build();
    engine.recover().await.unwrap();

    for amount in [5, 7, 9] {
        engine.raise(CounterEvent::Added { amount }).await.unwrap();
    }

    wait_until(|| handler.delivered.load(Ordering::SeqCst) == 3).await;
    assert_eq!(handler.sum.load(Ordering::SeqCst), 21);
    assert!(consumer.is_healthy());

    // The group checkpoint tracks the observable's version exactly
    let checkpoint = checkpoints.get("reporting", &actor).await.unwrap().unwrap();
    assert_eq!(checkpoint.version, 3);
    assert!(checkpoint.version <= engine.version());

    consumer.stop().await;
}

#[tokio::test]
async fn test_ignored_code_advances_checkpoint_without_delivery() {
    let broker = Arc::new(MemoryBroker::new(2));
    let checkpoints = Arc::new(MemoryObserverSnapshotStore::new());
    let container = Arc::new(ObserverUnitContainer::new(
        checkpoints.clone(),
        Arc::new(WallClockTime::new()),
    ));

    let handler = SummingHandler::new();
    let mut unit = ObserverUnit::new("counter");
    unit.register("reporting", handler.clone());
    unit.set_ignore("reporting", EventIgnore::deny(["counter.audited"]));
    container.install(unit).await;

    let mut consumer = ConsumerHost::new(
        broker.clone(),
        container,
        "reporting",
        fast_options(),
        Arc::new(WallClockTime::new()),
    );
    consumer.start();

    let actor = ActorId::new("counter", "c-2").unwrap();
    let mut engine: Sourcing<Counter> = Sourcing::builder(
        actor.clone(),
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemorySnapshotStore::new()),
    )
    .with_producer(broker.clone())
    .build();
    engine.recover().await.unwrap();

    engine.raise(CounterEvent::Added { amount: 4 }).await.unwrap();
    engine.raise(CounterEvent::Audited).await.unwrap();
    engine.raise(CounterEvent::Added { amount: 6 }).await.unwrap();

    wait_until(|| handler.sum.load(Ordering::SeqCst) == 10).await;
    // The audited event advanced the checkpoint but never reached a handler
    assert_eq!(handler.delivered.load(Ordering::SeqCst), 2);
    let checkpoint = checkpoints.get("reporting", &actor).await.unwrap().unwrap();
    assert_eq!(checkpoint.version, 3);

    consumer.stop().await;
}
