//! The application's cache stores, built once at startup and passed to
//! whoever needs them.

use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::core::Result;
use crate::entities::{
    BlockedSlot, DailyNote, Donation, Guest, GuestOwned, GuestProxy, GuestReminder,
    GuestWarning, MealRecord, ServiceRecord,
};
use crate::store::{CacheStore, Entity, LoadOptions, LoadOutcome, StoreKind};
use crate::sync::SyncTarget;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Dependent records removed by [`OpsCaches::remove_guest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub removed: usize,
    pub failed: usize,
}

pub struct OpsCaches {
    pub config: Arc<SyncConfig>,
    pub guests: Arc<CacheStore<Guest>>,
    pub meals: Arc<CacheStore<MealRecord>>,
    pub services: Arc<CacheStore<ServiceRecord>>,
    pub donations: Arc<CacheStore<Donation>>,
    pub reminders: Arc<CacheStore<GuestReminder>>,
    pub warnings: Arc<CacheStore<GuestWarning>>,
    pub proxies: Arc<CacheStore<GuestProxy>>,
    pub blocked_slots: Arc<CacheStore<BlockedSlot>>,
    pub daily_notes: Arc<CacheStore<DailyNote>>,
}

impl OpsCaches {
    pub fn new(backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        let config = Arc::new(config);
        Self {
            guests: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            meals: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            services: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            donations: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            reminders: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            warnings: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            proxies: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            blocked_slots: Arc::new(CacheStore::new(backend.clone(), config.clone())),
            daily_notes: Arc::new(CacheStore::new(backend, config.clone())),
            config,
        }
    }

    /// Every store, in [`StoreKind::ALL`] order.
    pub fn targets(&self) -> Vec<Arc<dyn SyncTarget>> {
        StoreKind::ALL.into_iter().map(|kind| self.target(kind)).collect()
    }

    pub fn target(&self, kind: StoreKind) -> Arc<dyn SyncTarget> {
        match kind {
            StoreKind::Guests => self.guests.clone(),
            StoreKind::Meals => self.meals.clone(),
            StoreKind::Services => self.services.clone(),
            StoreKind::Donations => self.donations.clone(),
            StoreKind::Reminders => self.reminders.clone(),
            StoreKind::Warnings => self.warnings.clone(),
            StoreKind::GuestProxies => self.proxies.clone(),
            StoreKind::BlockedSlots => self.blocked_slots.clone(),
            StoreKind::DailyNotes => self.daily_notes.clone(),
        }
    }

    /// Load the operational window of every store concurrently.
    pub async fn ensure_operational(&self) -> Vec<(StoreKind, LoadOutcome)> {
        let options = LoadOptions::default();
        let (guests, meals, services, donations, reminders, warnings, proxies, slots, notes) = tokio::join!(
            self.guests.ensure_loaded(options),
            self.meals.ensure_loaded(options),
            self.services.ensure_loaded(options),
            self.donations.ensure_loaded(options),
            self.reminders.ensure_loaded(options),
            self.warnings.ensure_loaded(options),
            self.proxies.ensure_loaded(options),
            self.blocked_slots.ensure_loaded(options),
            self.daily_notes.ensure_loaded(options),
        );
        StoreKind::ALL
            .into_iter()
            .zip([guests, meals, services, donations, reminders, warnings, proxies, slots, notes])
            .collect()
    }

    /// Delete a guest together with their proxies, warnings and reminders.
    ///
    /// Dependent deletes run first; their failures are logged and counted
    /// but do not stop the guest delete. A failed guest delete is rolled
    /// back and returned.
    pub async fn remove_guest(&self, guest_id: &str) -> Result<CascadeReport> {
        let mut report = CascadeReport::default();
        cascade(&self.proxies, guest_id, &mut report).await;
        cascade(&self.warnings, guest_id, &mut report).await;
        cascade(&self.reminders, guest_id, &mut report).await;

        self.guests.remove(guest_id).await?;
        info!(
            guest_id,
            removed = report.removed,
            failed = report.failed,
            "guest removed with dependents"
        );
        Ok(report)
    }
}

async fn cascade<E>(store: &CacheStore<E>, guest_id: &str, report: &mut CascadeReport)
where
    E: Entity + GuestOwned,
{
    // Dependents older than the operational window are still the guest's.
    if let LoadOutcome::Failed(message) = store.ensure_loaded(LoadOptions::full_history()).await {
        warn!(store = %E::KIND, guest_id, error = %message, "could not load dependents");
    }

    let owned = store.filter(|record| record.belongs_to(guest_id));
    let results = join_all(owned.iter().map(|record| store.remove(record.id()))).await;
    for (record, result) in owned.iter().zip(results) {
        match result {
            Ok(()) => report.removed += 1,
            Err(err) => {
                report.failed += 1;
                warn!(store = %E::KIND, guest_id, id = record.id(), error = %err, "dependent delete failed");
            }
        }
    }
}
