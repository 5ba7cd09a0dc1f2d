//! Selkie Runtime
//!
//! The in-process side of the framework: an actor host that gives every
//! actor instance effectively single-threaded turns, the event-sourcing
//! engine actors embed to persist their state as an append-only log, the
//! archiving policy for aging ranges of that log, and the observer engine
//! for actors materializing another actor's stream.
//!
//! # Threading model
//!
//! Each active actor runs on its own task behind a bounded mailbox; at most
//! one invocation is in flight per instance, so actor code never needs
//! internal locking. Different instances run concurrently.

pub mod actor;
pub mod archive;
pub mod dispatcher;
pub mod handle;
pub mod mailbox;
pub mod observer;
pub mod sourcing;

pub use actor::{Actor, ActorFactory};
pub use archive::should_archive;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
pub use handle::{ActorClient, ActorHost, ActorHostBuilder};
pub use mailbox::{ActorCell, Envelope};
pub use observer::{ConcurrentObserverCore, Observed, ObserverCore, Observing};
pub use sourcing::{EventSourced, RaiseOutcome, RecoveryReport, Sourcing, SourcingBuilder};
