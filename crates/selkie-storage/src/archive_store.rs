//! Archive record store contract

use async_trait::async_trait;
use selkie_core::{ActorId, BriefArchive, Result};

/// Storage for closed archive ranges, keyed by actor id and ordered by index
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn insert(&self, actor_id: &ActorId, archive: &BriefArchive) -> Result<()>;

    /// Overwrite an existing archive record (used to flip `events_cleared`)
    async fn update(&self, actor_id: &ActorId, archive: &BriefArchive) -> Result<()>;

    /// All archives for an actor, ordered by index ascending
    async fn list(&self, actor_id: &ActorId) -> Result<Vec<BriefArchive>>;

    /// The most recent archive, if any
    async fn latest(&self, actor_id: &ActorId) -> Result<Option<BriefArchive>> {
        Ok(self.list(actor_id).await?.into_iter().last())
    }
}
