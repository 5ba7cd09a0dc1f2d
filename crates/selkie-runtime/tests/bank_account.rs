//! Bank account actor hosted end to end: host routing, serialized turns,
//! event-sourced state, idempotent top-ups, and survival across
//! deactivation.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{ActorId, Error, EventBasicInfo, EventCodec, EventUid, Result};
use selkie_runtime::{Actor, ActorFactory, ActorHost, EventSourced, Sourcing};
use selkie_storage::{EventStore, MemoryEventStore, MemorySnapshotStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct BankState {
    balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum BankEvent {
    AmountAdded { amount: i64 },
}

impl EventCodec for BankEvent {
    fn event_code(&self) -> &'static str {
        "bank.amount_added"
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization_failed(e.to_string()))
    }

    fn decode(code: &str, bytes: &[u8]) -> Result<Self> {
        if code != "bank.amount_added" {
            return Err(Error::UnknownEventCode { code: code.into() });
        }
        serde_json::from_slice(bytes).map_err(|e| Error::deserialization_failed(e.to_string()))
    }
}

struct Bank;

impl EventSourced for Bank {
    type State = BankState;
    type Event = BankEvent;
    const KIND: &'static str = "bank";

    fn apply(state: &mut BankState, event: &BankEvent, _info: &EventBasicInfo) {
        let BankEvent::AmountAdded { amount } = event;
        state.balance += amount;
    }
}

#[derive(Serialize, Deserialize)]
struct TopUp {
    amount: i64,
    uid: String,
    timestamp_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct TopUpReply {
    balance: i64,
    duplicate: bool,
}

struct BankActor {
    engine: Sourcing<Bank>,
}

#[async_trait]
impl Actor for BankActor {
    async fn on_activate(&mut self) -> Result<()> {
        self.engine.recover().await?;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes> {
        match operation {
            "top_up" => {
                let req: TopUp = serde_json::from_slice(&payload)
                    .map_err(|e| Error::deserialization_failed(e.to_string()))?;
                let uid = EventUid::bare(&req.uid, req.timestamp_ms);
                let outcome = self
                    .engine
                    .raise_with_uid(BankEvent::AmountAdded { amount: req.amount }, &uid)
                    .await?;
                let reply = TopUpReply {
                    balance: self.engine.state().balance,
                    duplicate: outcome.is_duplicate(),
                };
                serde_json::to_vec(&reply)
                    .map(Bytes::from)
                    .map_err(|e| Error::serialization_failed(e.to_string()))
            }
            "balance" => {
                serde_json::to_vec(&self.engine.state().balance)
                    .map(Bytes::from)
                    .map_err(|e| Error::serialization_failed(e.to_string()))
            }
            other => Err(Error::InvalidOperation {
                operation: other.to_string(),
            }),
        }
    }

    async fn on_deactivate(&mut self) -> Result<()> {
        self.engine.flush(true).await
    }
}

struct BankFactory {
    events: Arc<MemoryEventStore>,
    snapshots: Arc<MemorySnapshotStore>,
}

impl ActorFactory for BankFactory {
    fn kind(&self) -> &str {
        "bank"
    }

    fn create(&self, id: &ActorId) -> Box<dyn Actor> {
        Box::new(BankActor {
            engine: Sourcing::builder(id.clone(), self.events.clone(), self.snapshots.clone())
                .build(),
        })
    }
}

fn start_host() -> (ActorHost, Arc<MemoryEventStore>) {
    let events = Arc::new(MemoryEventStore::new());
    let host = ActorHost::builder()
        .with_factory(Arc::new(BankFactory {
            events: events.clone(),
            snapshots: Arc::new(MemorySnapshotStore::new()),
        }))
        .start();
    (host, events)
}

fn top_up(amount: i64, uid: &str) -> TopUp {
    TopUp {
        amount,
        uid: uid.to_string(),
        timestamp_ms: 1_000,
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_top_ups_count_once() {
    let (host, _events) = start_host();
    let client = host.client(ActorId::new("bank", "b-1").unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let reply: TopUpReply = client
                .invoke_json("top_up", &top_up(100, "promo-1"))
                .await
                .unwrap();
            reply
        }));
    }

    let mut duplicates = 0;
    for handle in handles {
        if handle.await.unwrap().duplicate {
            duplicates += 1;
        }
    }
    assert_eq!(duplicates, 7, "exactly one raise lands");

    let balance: i64 = client.invoke_json("balance", &()).await.unwrap();
    assert_eq!(balance, 100);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_distinct_top_ups_all_land() {
    let (host, events) = start_host();
    let client = host.client(ActorId::new("bank", "b-1").unwrap());

    let mut handles = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let _: TopUpReply = client
                .invoke_json("top_up", &top_up(10, &format!("t-{i}")))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let balance: i64 = client.invoke_json("balance", &()).await.unwrap();
    assert_eq!(balance, 100);

    // Turns were serialized: the log is gapless 1..=10
    let actor = ActorId::new("bank", "b-1").unwrap();
    let log = events.get_list(&actor, 0, 1, 100).await.unwrap();
    let versions: Vec<u64> = log.iter().map(|r| r.version).collect();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_balance_survives_deactivation() {
    let (host, _events) = start_host();
    let client = host.client(ActorId::new("bank", "b-2").unwrap());

    let _: TopUpReply = client.invoke_json("top_up", &top_up(250, "u-1")).await.unwrap();
    client.deactivate().await.unwrap();

    // Next invocation re-activates and recovers from the log
    let balance: i64 = client.invoke_json("balance", &()).await.unwrap();
    assert_eq!(balance, 250);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let (host, _events) = start_host();
    let client = host.client(ActorId::new("bank", "b-3").unwrap());

    let err = client.invoke("transmogrify", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation { .. }));
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_kind_is_rejected() {
    let (host, _events) = start_host();
    let client = host.client(ActorId::new("ghost", "g-1").unwrap());

    let err = client.invoke("balance", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, Error::ActorNotFound { .. }));
    host.shutdown().await.unwrap();
}
