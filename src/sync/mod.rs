//! Sync coordinator: routes pushed change events to their owning store
//! through one debounce worker per store.

mod debounce;
mod resync;
mod stats;
mod target;

pub use stats::{SyncStats, SyncStatsSnapshot};
pub use target::SyncTarget;

use crate::channel::{ChangeHandlers, ChannelManager, SubscriptionHandle};
use crate::config::SyncConfig;
use crate::core::{Result, SyncError};
use crate::store::{StoreKind, SyncStrategy};
use debounce::DebounceWorker;
use resync::ResyncWorker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct SyncCoordinator {
    channels: ChannelManager,
    subscriptions: Vec<SubscriptionHandle>,
    workers: HashMap<StoreKind, DebounceWorker>,
    strategies: HashMap<StoreKind, SyncStrategy>,
    resync: Option<ResyncWorker>,
    stats: Arc<SyncStats>,
}

impl SyncCoordinator {
    /// Subscribe to every table the targets own and start their workers.
    /// Returns once every channel is open.
    pub async fn start(
        targets: Vec<Arc<dyn SyncTarget>>,
        channels: ChannelManager,
        config: &SyncConfig,
    ) -> Result<Self> {
        let stats = Arc::new(SyncStats::default());
        let mut workers = HashMap::new();
        let mut strategies = HashMap::new();

        for target in &targets {
            let kind = target.kind();
            if workers.contains_key(&kind) {
                return Err(SyncError::Config(format!("store '{}' registered twice", kind)));
            }
            let strategy = config.strategy_for(kind);
            strategies.insert(kind, strategy);
            workers.insert(
                kind,
                DebounceWorker::spawn(target.clone(), strategy, config.debounce, stats.clone()),
            );
        }

        let mut subscriptions = Vec::new();
        for (&kind, worker) in &workers {
            for &table in kind.tables() {
                // Routing is by owning store, so a laundry event lands in
                // the services worker.
                debug_assert_eq!(StoreKind::owner_of(table), kind);
                let sender = worker.sender();
                let stats = stats.clone();
                let handlers = ChangeHandlers::new().on_change(move |event| {
                    stats.event_received();
                    let _ = sender.send(event.clone());
                });
                subscriptions.push(channels.subscribe(table, None, handlers)?);
            }
        }

        for subscription in &mut subscriptions {
            subscription.ready().await?;
        }

        let resync = config
            .resync_interval
            .map(|interval| ResyncWorker::spawn(targets.clone(), interval, stats.clone()));

        info!(
            stores = workers.len(),
            channels = subscriptions.len(),
            debounce_ms = config.debounce.as_millis() as u64,
            resync = resync.is_some(),
            "sync coordinator started"
        );

        Ok(Self {
            channels,
            subscriptions,
            workers,
            strategies,
            resync,
            stats,
        })
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn strategy(&self, kind: StoreKind) -> Option<SyncStrategy> {
        self.strategies.get(&kind).copied()
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Unsubscribe every channel and stop the workers. Windows still
    /// debouncing are dropped.
    pub async fn shutdown(mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        for (_, worker) in self.workers.drain() {
            worker.stop().await;
        }
        if let Some(resync) = self.resync.take() {
            resync.stop().await;
        }
        info!("sync coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChangeEvent, RawRow, TableName};
    use crate::store::{BatchOutcome, LoadOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records what the coordinator asks of it.
    #[derive(Default)]
    struct RecordingTarget {
        loaded: bool,
        loading: bool,
        echoes: bool,
        batches: Mutex<Vec<usize>>,
        reloads: AtomicUsize,
    }

    #[async_trait]
    impl SyncTarget for RecordingTarget {
        fn kind(&self) -> StoreKind {
            StoreKind::BlockedSlots
        }

        fn is_loaded(&self) -> bool {
            self.loaded
        }

        fn is_loading(&self) -> bool {
            self.loading
        }

        fn is_echo(&self, _event: &ChangeEvent) -> bool {
            self.echoes
        }

        fn apply_remote_batch(&self, events: &[ChangeEvent]) -> BatchOutcome {
            self.batches.lock().unwrap().push(events.len());
            BatchOutcome {
                applied: events.len(),
                ..Default::default()
            }
        }

        async fn reload(&self) -> LoadOutcome {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            LoadOutcome::Loaded { fetched: 0 }
        }
    }

    fn event() -> ChangeEvent {
        let mut row = RawRow::new();
        row.insert("id".into(), "s1".into());
        ChangeEvent::insert(TableName::BlockedSlots, row)
    }

    #[tokio::test]
    async fn test_reload_window_skips_echoes() {
        let target = RecordingTarget {
            loaded: true,
            echoes: true,
            ..Default::default()
        };
        let stats = SyncStats::default();

        debounce::apply_window(&target, SyncStrategy::Reload, &[event(), event()], &stats).await;

        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().echo_windows_skipped, 1);
    }

    #[tokio::test]
    async fn test_reload_window_skips_unloaded_store() {
        let target = RecordingTarget::default();
        let stats = SyncStats::default();

        debounce::apply_window(&target, SyncStrategy::Reload, &[event()], &stats).await;

        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().windows_fired, 1);
    }

    #[tokio::test]
    async fn test_reload_window_reloads_store_still_loading() {
        let target = RecordingTarget {
            loading: true,
            ..Default::default()
        };
        let stats = SyncStats::default();

        debounce::apply_window(&target, SyncStrategy::Reload, &[event()], &stats).await;

        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().reloads_issued, 1);
    }

    #[tokio::test]
    async fn test_patch_window_applies_once() {
        let target = RecordingTarget {
            loaded: true,
            ..Default::default()
        };
        let stats = SyncStats::default();

        debounce::apply_window(&target, SyncStrategy::Patch, &[event(), event(), event()], &stats)
            .await;

        assert_eq!(*target.batches.lock().unwrap(), vec![3]);
        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().patches_applied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_reload() {
        let target = Arc::new(RecordingTarget {
            loaded: true,
            ..Default::default()
        });
        let stats = Arc::new(SyncStats::default());
        let worker = DebounceWorker::spawn(
            target.clone(),
            SyncStrategy::Reload,
            std::time::Duration::from_millis(500),
            stats.clone(),
        );
        let sender = worker.sender();

        for _ in 0..3 {
            sender.send(event()).unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(target.reloads.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert_eq!(target.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().windows_fired, 1);

        worker.stop().await;
    }
}
