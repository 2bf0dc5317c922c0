//! Per-target debounce worker.
//!
//! `Idle -> Debouncing -> Applying -> Idle`. The first event opens a
//! window, every further event pushes the deadline out, and when the
//! window closes the whole batch produces exactly one effect: a patch
//! batch or a forced reload. Events arriving while the effect runs open
//! the next window.

use super::stats::SyncStats;
use super::target::SyncTarget;
use crate::core::ChangeEvent;
use crate::store::{LoadOutcome, SyncStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

pub(crate) struct DebounceWorker {
    sender: mpsc::UnboundedSender<ChangeEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl DebounceWorker {
    pub(crate) fn spawn(
        target: Arc<dyn SyncTarget>,
        strategy: SyncStrategy,
        window: Duration,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let join_handle = tokio::spawn(run(target, strategy, window, stats, receiver, stop_rx));

        Self {
            sender,
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<ChangeEvent> {
        self.sender.clone()
    }

    /// Signal the worker to stop and wait for it. A pending window is
    /// discarded.
    pub(crate) async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take()
            && let Err(err) = join_handle.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "debounce worker join failed");
        }
    }
}

impl Drop for DebounceWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

async fn run(
    target: Arc<dyn SyncTarget>,
    strategy: SyncStrategy,
    window: Duration,
    stats: Arc<SyncStats>,
    mut receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        let first = tokio::select! {
            _ = &mut stop_rx => return,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        let mut batch = vec![first];
        let mut deadline = Instant::now() + window;
        loop {
            tokio::select! {
                _ = &mut stop_rx => return,
                _ = sleep_until(deadline) => break,
                event = receiver.recv() => match event {
                    Some(event) => {
                        batch.push(event);
                        deadline = Instant::now() + window;
                    }
                    None => break,
                },
            }
        }

        apply_window(target.as_ref(), strategy, &batch, &stats).await;
    }
}

/// Run the single effect of a closed window.
pub(crate) async fn apply_window(
    target: &dyn SyncTarget,
    strategy: SyncStrategy,
    batch: &[ChangeEvent],
    stats: &SyncStats,
) {
    let store = target.kind();
    stats.window_fired();

    match strategy {
        SyncStrategy::Patch => {
            let outcome = target.apply_remote_batch(batch);
            stats.patches_applied(outcome.applied);
            debug!(
                %store,
                events = batch.len(),
                applied = outcome.applied,
                unchanged = outcome.unchanged,
                ignored = outcome.ignored,
                "patch window applied"
            );
            if outcome.needs_reload {
                reload(target, stats).await;
            }
        }
        SyncStrategy::Reload => {
            // A load in flight may have read the table before these changes.
            if !target.is_loaded() && !target.is_loading() {
                debug!(%store, events = batch.len(), "store not loaded, skipping reload");
                return;
            }
            if batch.iter().all(|event| target.is_echo(event)) {
                stats.echo_window_skipped();
                debug!(%store, events = batch.len(), "window only echoes cached state");
                return;
            }
            reload(target, stats).await;
        }
    }
}

async fn reload(target: &dyn SyncTarget, stats: &SyncStats) {
    stats.reload_issued();
    match target.reload().await {
        LoadOutcome::Failed(message) => {
            warn!(store = %target.kind(), error = %message, "reload after change window failed");
        }
        outcome => debug!(store = %target.kind(), ?outcome, "reloaded after change window"),
    }
}
