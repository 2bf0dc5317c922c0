use super::stats::SyncStats;
use super::target::SyncTarget;
use crate::store::LoadOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Background worker forcing a reload of every loaded target on a fixed
/// interval. Covers events lost while the transport reconnects.
pub(crate) struct ResyncWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ResyncWorker {
    pub(crate) fn spawn(
        targets: Vec<Arc<dyn SyncTarget>>,
        interval: Duration,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval = interval.max(Duration::from_millis(10));

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        resync_tick(&targets, &stats).await;
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub(crate) async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take()
            && let Err(err) = join_handle.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "resync worker join failed");
        }
    }
}

impl Drop for ResyncWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

async fn resync_tick(targets: &[Arc<dyn SyncTarget>], stats: &SyncStats) {
    for target in targets.iter().filter(|target| target.is_loaded()) {
        stats.reload_issued();
        match target.reload().await {
            LoadOutcome::Failed(message) => {
                warn!(store = %target.kind(), error = %message, "periodic resync failed");
            }
            outcome => debug!(store = %target.kind(), ?outcome, "periodic resync"),
        }
    }
}
