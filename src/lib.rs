// ============================================================================
// opscache: client-side cache and realtime sync for day-of-service records
// ============================================================================

/// Log a realtime diagnostic at `info` when the debug toggle is on and at
/// `trace` otherwise.
macro_rules! realtime_log {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}
pub(crate) use realtime_log;

pub mod backend;
pub mod caches;
pub mod channel;
pub mod config;
pub mod core;
pub mod entities;
pub mod store;
pub mod sync;

pub use backend::{Backend, ChangeTransport, MemoryBackend};
pub use caches::{CascadeReport, OpsCaches};
pub use channel::{ChangeHandlers, ChannelManager, SubscriptionHandle};
pub use config::SyncConfig;
pub use core::{ChangeEvent, ChangeKind, RawRow, Result, RowFilter, SyncError, TableName};
pub use store::{
    CacheStore, Entity, LoadOptions, LoadOutcome, PatchOutcome, StoreKind, SyncStrategy,
};
pub use sync::{SyncCoordinator, SyncStatsSnapshot, SyncTarget};
