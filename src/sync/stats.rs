use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the listeners and workers of one coordinator.
#[derive(Debug, Default)]
pub struct SyncStats {
    events_received: AtomicU64,
    windows_fired: AtomicU64,
    patches_applied: AtomicU64,
    reloads_issued: AtomicU64,
    echo_windows_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    pub events_received: u64,
    pub windows_fired: u64,
    /// Rows changed by patch batches.
    pub patches_applied: u64,
    pub reloads_issued: u64,
    pub echo_windows_skipped: u64,
}

impl SyncStats {
    pub(crate) fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn window_fired(&self) {
        self.windows_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn patches_applied(&self, count: usize) {
        self.patches_applied.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn reload_issued(&self) {
        self.reloads_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn echo_window_skipped(&self) {
        self.echo_windows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            windows_fired: self.windows_fired.load(Ordering::Relaxed),
            patches_applied: self.patches_applied.load(Ordering::Relaxed),
            reloads_issued: self.reloads_issued.load(Ordering::Relaxed),
            echo_windows_skipped: self.echo_windows_skipped.load(Ordering::Relaxed),
        }
    }
}
