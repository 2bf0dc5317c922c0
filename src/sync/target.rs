use crate::core::ChangeEvent;
use crate::store::{BatchOutcome, CacheStore, Entity, LoadOutcome, StoreKind};
use async_trait::async_trait;

/// The store-side surface the coordinator drives.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn is_loaded(&self) -> bool;

    fn is_loading(&self) -> bool;

    fn is_echo(&self, event: &ChangeEvent) -> bool;

    fn apply_remote_batch(&self, events: &[ChangeEvent]) -> BatchOutcome;

    async fn reload(&self) -> LoadOutcome;
}

#[async_trait]
impl<E: Entity> SyncTarget for CacheStore<E> {
    fn kind(&self) -> StoreKind {
        E::KIND
    }

    fn is_loaded(&self) -> bool {
        CacheStore::is_loaded(self)
    }

    fn is_loading(&self) -> bool {
        CacheStore::is_loading(self)
    }

    fn is_echo(&self, event: &ChangeEvent) -> bool {
        CacheStore::is_echo(self, event)
    }

    fn apply_remote_batch(&self, events: &[ChangeEvent]) -> BatchOutcome {
        CacheStore::apply_remote_batch(self, events)
    }

    async fn reload(&self) -> LoadOutcome {
        CacheStore::reload(self).await
    }
}
