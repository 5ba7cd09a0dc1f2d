//! Observer units and the container
//!
//! An observer unit binds one observable actor kind to its named observer
//! groups. Groups are registered explicitly at startup; the dispatch lists
//! are plain vectors built at registration time, so the delivery hot path
//! does no type inspection of any sort.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{ActorId, Error, EventEnvelope, EventRegistry, Result, TimeProvider};
use selkie_storage::{ObserverSnapshotRecord, ObserverSnapshotStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One named observer of an actor kind's event stream
#[async_trait]
pub trait ObserverHandler: Send + Sync {
    /// Stable handler name, unique within its group
    fn name(&self) -> &str;

    /// Process one committed event
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Per-group event filter
///
/// Ignored events still advance the group's checkpoint; they just never
/// reach a handler. Skipping the checkpoint advance would wedge the strict
/// in-order gate on the first ignored code.
#[derive(Debug, Clone, Default)]
pub enum EventIgnore {
    /// Deliver every code
    #[default]
    AllowAll,
    /// Advance past the listed codes without invoking handlers
    Deny(HashSet<String>),
}

impl EventIgnore {
    pub fn deny<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Deny(codes.into_iter().map(Into::into).collect())
    }

    pub fn ignores(&self, code: &str) -> bool {
        match self {
            EventIgnore::AllowAll => false,
            EventIgnore::Deny(codes) => codes.contains(code),
        }
    }
}

/// A named group of handlers sharing one checkpoint
pub struct ObserverGroup {
    name: String,
    ignore: EventIgnore,
    handlers: Vec<Arc<dyn ObserverHandler>>,
}

impl ObserverGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignore: EventIgnore::AllowAll,
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handlers(&self) -> &[Arc<dyn ObserverHandler>] {
        &self.handlers
    }

    pub fn ignore(&self) -> &EventIgnore {
        &self.ignore
    }
}

/// Observer groups for one observable actor kind
pub struct ObserverUnit {
    kind: String,
    groups: Vec<ObserverGroup>,
}

impl ObserverUnit {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            groups: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Register a handler under a group, creating the group on first use.
    ///
    /// Idempotent by (group, handler name): re-registering the same name is
    /// a no-op, so repeated startup wiring cannot double-deliver.
    pub fn register(&mut self, group: &str, handler: Arc<dyn ObserverHandler>) {
        let slot = match self.groups.iter_mut().find(|g| g.name == group) {
            Some(g) => g,
            None => {
                self.groups.push(ObserverGroup::new(group));
                self.groups.last_mut().unwrap()
            }
        };
        if slot.handlers.iter().any(|h| h.name() == handler.name()) {
            debug!(
                kind = %self.kind,
                group,
                handler = handler.name(),
                "handler already registered, skipping"
            );
            return;
        }
        slot.handlers.push(handler);
    }

    /// Set the ignore policy for a group, creating the group on first use
    pub fn set_ignore(&mut self, group: &str, ignore: EventIgnore) {
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(g) => g.ignore = ignore,
            None => {
                let mut g = ObserverGroup::new(group);
                g.ignore = ignore;
                self.groups.push(g);
            }
        }
    }

    pub fn groups(&self) -> &[ObserverGroup] {
        &self.groups
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    pub fn handlers(&self, group: &str) -> Option<&[Arc<dyn ObserverHandler>]> {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.handlers.as_slice())
    }

    pub fn all_handlers(&self) -> impl Iterator<Item = &Arc<dyn ObserverHandler>> {
        self.groups.iter().flat_map(|g| g.handlers.iter())
    }
}

/// Relation of an incoming event version to a group's checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionGap {
    /// Exactly checkpoint + 1, in line for delivery
    Next,
    /// At or below the checkpoint; redelivery, nothing to do
    AlreadySeen,
    /// Versions between the checkpoint and this event are missing
    Missing { expected: u64, actual: u64 },
}

/// Kind-to-unit map plus the per-(group, actor) checkpoint gate
///
/// Checkpoints are the fan-out engine's idempotency mechanism: a group's
/// checkpoint never exceeds the observable actor's committed version, and
/// only moves forward one version at a time.
pub struct ObserverUnitContainer {
    units: RwLock<HashMap<String, ObserverUnit>>,
    checkpoints: Arc<dyn ObserverSnapshotStore>,
    time: Arc<dyn TimeProvider>,
    registry: Option<Arc<EventRegistry>>,
}

impl ObserverUnitContainer {
    pub fn new(checkpoints: Arc<dyn ObserverSnapshotStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            checkpoints,
            time,
            registry: None,
        }
    }

    /// Validate incoming event codes against a registry built at startup.
    ///
    /// With a registry installed, an envelope carrying an unregistered code
    /// (or a code registered to a different kind) is rejected before any
    /// group sees it, halting its partition instead of feeding handlers an
    /// event nobody declared.
    pub fn with_registry(mut self, registry: Arc<EventRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Install a fully built unit, replacing any unit for the same kind
    pub async fn install(&self, unit: ObserverUnit) {
        let mut units = self.units.write().await;
        units.insert(unit.kind().to_string(), unit);
    }

    /// Register one handler, creating the unit and group as needed
    pub async fn register(&self, kind: &str, group: &str, handler: Arc<dyn ObserverHandler>) {
        let mut units = self.units.write().await;
        units
            .entry(kind.to_string())
            .or_insert_with(|| ObserverUnit::new(kind))
            .register(group, handler);
    }

    pub async fn group_names(&self, kind: &str) -> Vec<String> {
        let units = self.units.read().await;
        units.get(kind).map(|u| u.group_names()).unwrap_or_default()
    }

    /// Compare `src_version` against the group's checkpoint without moving it
    pub async fn check_version(
        &self,
        group: &str,
        actor_id: &ActorId,
        src_version: u64,
    ) -> Result<VersionGap> {
        let checkpoint = self.load(group, actor_id).await?;
        Ok(Self::classify(checkpoint.version, src_version))
    }

    /// Compare `src_version` against the group's checkpoint and, when it is
    /// the next version in line, advance the checkpoint to it.
    ///
    /// This is the atomic per-group gate: callers run handlers first and
    /// advance after, so a handler failure leaves the checkpoint untouched
    /// and redelivery retries the same event.
    pub async fn get_and_save_version(
        &self,
        group: &str,
        actor_id: &ActorId,
        src_version: u64,
    ) -> Result<VersionGap> {
        let mut checkpoint = self.load(group, actor_id).await?;
        let gap = Self::classify(checkpoint.version, src_version);
        if gap == VersionGap::Next {
            checkpoint.version = src_version;
            checkpoint.doing_version = src_version;
            self.checkpoints.upsert(group, &checkpoint).await?;
        }
        Ok(gap)
    }

    /// Deliver one committed event to every group of its kind's unit.
    ///
    /// Groups are independent: a group that already saw the event skips it,
    /// an ignoring group advances its checkpoint without handlers, and a
    /// handler failure stops delivery with every completed group's
    /// checkpoint already saved.
    pub async fn deliver(&self, envelope: &EventEnvelope) -> Result<()> {
        if let Some(registry) = &self.registry {
            let kind = registry.kind_of(&envelope.code)?;
            if kind != envelope.kind {
                return Err(Error::internal(format!(
                    "event code {} is registered to kind {}, envelope carries kind {}",
                    envelope.code, kind, envelope.kind
                )));
            }
        }

        let units = self.units.read().await;
        let Some(unit) = units.get(&envelope.kind) else {
            debug!(kind = %envelope.kind, "no observers registered for kind");
            return Ok(());
        };

        for group in unit.groups() {
            if group.ignore().ignores(&envelope.code) {
                self.get_and_save_version(group.name(), &envelope.actor_id, envelope.version)
                    .await?;
                continue;
            }

            match self
                .check_version(group.name(), &envelope.actor_id, envelope.version)
                .await?
            {
                VersionGap::AlreadySeen => continue,
                VersionGap::Missing { expected, actual } => {
                    warn!(
                        group = group.name(),
                        actor_id = %envelope.actor_id,
                        expected,
                        actual,
                        "version gap on delivery"
                    );
                    return Err(Error::version_conflict(
                        envelope.actor_id.qualified_name(),
                        expected,
                        actual,
                    ));
                }
                VersionGap::Next => {
                    for handler in group.handlers() {
                        handler.handle(envelope).await?;
                    }
                    self.get_and_save_version(group.name(), &envelope.actor_id, envelope.version)
                        .await?;
                }
            }
        }

        Ok(())
    }

    // Container checkpoints carry no projection state; handlers own their
    // own durability.
    async fn load(&self, group: &str, actor_id: &ActorId) -> Result<ObserverSnapshotRecord> {
        Ok(self
            .checkpoints
            .get(group, actor_id)
            .await?
            .unwrap_or_else(|| ObserverSnapshotRecord {
                actor_id: actor_id.clone(),
                version: 0,
                doing_version: 0,
                start_timestamp_ms: self.time.now_ms(),
                state: Bytes::new(),
            }))
    }

    fn classify(checkpoint: u64, src_version: u64) -> VersionGap {
        if src_version <= checkpoint {
            VersionGap::AlreadySeen
        } else if src_version == checkpoint + 1 {
            VersionGap::Next
        } else {
            VersionGap::Missing {
                expected: checkpoint + 1,
                actual: src_version,
            }
        }
    }
}
