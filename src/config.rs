use crate::core::{Result, SyncError};
use crate::store::{StoreKind, SyncStrategy};
use std::collections::HashMap;
use std::time::Duration;

pub const ENV_DEBOUNCE_MS: &str = "OPSCACHE_DEBOUNCE_MS";
pub const ENV_ROW_CAP: &str = "OPSCACHE_ROW_CAP";
pub const ENV_WINDOW_DAYS: &str = "OPSCACHE_WINDOW_DAYS";
pub const ENV_RESYNC_SECS: &str = "OPSCACHE_RESYNC_SECS";
pub const ENV_REALTIME_DEBUG: &str = "OPSCACHE_REALTIME_DEBUG";

/// Cache and realtime sync configuration
///
/// Built once at startup and shared by every store and the coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiescence period before a burst of change events takes effect
    pub debounce: Duration,

    /// Maximum rows returned by one bulk read
    pub row_cap: usize,

    /// Range loaded by a bare `ensure_loaded` on an empty store.
    /// `None` loads full history.
    pub operational_window: Option<chrono::Duration>,

    /// Periodic forced reload of loaded stores
    pub resync_interval: Option<Duration>,

    /// Verbose logging of every subscribe, unsubscribe and change event
    pub debug_realtime: bool,

    /// Per-store replacement for the store's default sync strategy
    pub strategy_overrides: HashMap<StoreKind, SyncStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(550),
            row_cap: 2000,
            operational_window: Some(chrono::Duration::days(30)),
            resync_interval: None,
            debug_realtime: false,
            strategy_overrides: HashMap::new(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the bulk-read row cap
    pub fn row_cap(mut self, cap: usize) -> Self {
        self.row_cap = cap.max(1);
        self
    }

    /// Set the default recent-only window
    pub fn operational_window(mut self, window: chrono::Duration) -> Self {
        self.operational_window = Some(window);
        self
    }

    /// Load full history by default
    pub fn full_history(mut self) -> Self {
        self.operational_window = None;
        self
    }

    /// Enable periodic forced reloads
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    /// Toggle verbose realtime logging
    pub fn debug_realtime(mut self, enabled: bool) -> Self {
        self.debug_realtime = enabled;
        self
    }

    /// Override the sync strategy of one store
    pub fn strategy(mut self, kind: StoreKind, strategy: SyncStrategy) -> Self {
        self.strategy_overrides.insert(kind, strategy);
        self
    }

    pub fn strategy_for(&self, kind: StoreKind) -> SyncStrategy {
        self.strategy_overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_strategy())
    }

    /// Build from `OPSCACHE_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = lookup(ENV_DEBOUNCE_MS) {
            config.debounce = Duration::from_millis(parse_number(ENV_DEBOUNCE_MS, &ms)?);
        }
        if let Some(cap) = lookup(ENV_ROW_CAP) {
            config = config.row_cap(parse_number(ENV_ROW_CAP, &cap)? as usize);
        }
        if let Some(days) = lookup(ENV_WINDOW_DAYS) {
            let days = parse_number(ENV_WINDOW_DAYS, &days)?;
            config.operational_window = match days {
                0 => None,
                days => Some(chrono::Duration::days(days as i64)),
            };
        }
        if let Some(secs) = lookup(ENV_RESYNC_SECS) {
            let secs = parse_number(ENV_RESYNC_SECS, &secs)?;
            config.resync_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(flag) = lookup(ENV_REALTIME_DEBUG) {
            config.debug_realtime = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        Ok(config)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|err| SyncError::Config(format!("{}='{}': {}", key, raw, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(550));
        assert_eq!(config.row_cap, 2000);
        assert_eq!(config.operational_window, Some(chrono::Duration::days(30)));
        assert!(!config.debug_realtime);
        assert_eq!(config.strategy_for(StoreKind::BlockedSlots), SyncStrategy::Reload);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SyncConfig::new()
            .debounce(Duration::from_millis(100))
            .row_cap(0)
            .full_history()
            .strategy(StoreKind::Services, SyncStrategy::Reload);

        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.row_cap, 1);
        assert!(config.operational_window.is_none());
        assert_eq!(config.strategy_for(StoreKind::Services), SyncStrategy::Reload);
    }

    #[test]
    fn test_from_lookup() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_DEBOUNCE_MS, "250"),
            (ENV_WINDOW_DAYS, "0"),
            (ENV_RESYNC_SECS, "60"),
            (ENV_REALTIME_DEBUG, "TRUE"),
        ]))
        .unwrap();

        assert_eq!(config.debounce, Duration::from_millis(250));
        assert!(config.operational_window.is_none());
        assert_eq!(config.resync_interval, Some(Duration::from_secs(60)));
        assert!(config.debug_realtime);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SyncConfig::from_lookup(lookup(&[(ENV_ROW_CAP, "lots")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
