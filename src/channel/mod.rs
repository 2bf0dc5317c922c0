//! Change-event channel manager.
//!
//! One transport-level subscription ("channel") per `table + filter`.
//! Repeat subscriptions attach another listener to the existing channel;
//! the channel closes when its last listener detaches.

use crate::backend::ChangeTransport;
use crate::core::{ChangeEvent, ChangeKind, Result, RowFilter, SyncError, TableName};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callbacks for one registration. `on_change` fires for every event,
/// after the kind-specific callback.
#[derive(Clone, Default)]
pub struct ChangeHandlers {
    on_insert: Option<ChangeCallback>,
    on_update: Option<ChangeCallback>,
    on_delete: Option<ChangeCallback>,
    on_change: Option<ChangeCallback>,
}

impl ChangeHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Arc::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(f));
        self
    }

    pub fn on_change(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    fn dispatch(&self, event: &ChangeEvent) {
        let specific = match event.kind {
            ChangeKind::Insert => &self.on_insert,
            ChangeKind::Update => &self.on_update,
            ChangeKind::Delete => &self.on_delete,
        };
        if let Some(callback) = specific {
            callback(event);
        }
        if let Some(callback) = &self.on_change {
            callback(event);
        }
    }
}

impl fmt::Debug for ChangeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHandlers")
            .field("on_insert", &self.on_insert.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

/// Channel identity: table plus optional filter (absent = all rows).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub table: TableName,
    pub filter: Option<RowFilter>,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "realtime:{}:{}", self.table, filter),
            None => write!(f, "realtime:{}:*", self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Failed(String),
    Closed,
}

struct Channel {
    listeners: HashMap<u64, ChangeHandlers>,
    state: watch::Sender<ChannelState>,
    pump: JoinHandle<()>,
}

struct ManagerInner {
    transport: Arc<dyn ChangeTransport>,
    channels: Mutex<HashMap<ChannelKey, Channel>>,
    next_listener: AtomicU64,
    opened: AtomicUsize,
    debug: bool,
}

impl ManagerInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelKey, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, key: &ChannelKey, listener: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(key) else {
            return;
        };
        channel.listeners.remove(&listener);
        crate::realtime_log!(self.debug, channel = %key, listener, "unsubscribed");

        if channel.listeners.is_empty()
            && let Some(channel) = channels.remove(key)
        {
            channel.pump.abort();
            channel.state.send_replace(ChannelState::Closed);
            crate::realtime_log!(self.debug, channel = %key, "channel closed");
        }
    }

    fn listeners(&self, key: &ChannelKey) -> Option<Vec<ChangeHandlers>> {
        self.channels()
            .get(key)
            .map(|channel| channel.listeners.values().cloned().collect())
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let channels = self.channels.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, channel) in channels.drain() {
            channel.pump.abort();
        }
    }
}

/// Owns every realtime channel of the process.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

impl ChannelManager {
    pub fn new(transport: Arc<dyn ChangeTransport>, debug: bool) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                channels: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                opened: AtomicUsize::new(0),
                debug,
            }),
        }
    }

    /// Register `handlers` for changes to `table`, optionally narrowed by a
    /// `column=eq.value` filter. Must be called within a tokio runtime: a
    /// new channel opens its transport subscription on a spawned task.
    pub fn subscribe(
        &self,
        table: TableName,
        filter: Option<&str>,
        handlers: ChangeHandlers,
    ) -> Result<SubscriptionHandle> {
        let filter = filter.map(str::parse::<RowFilter>).transpose()?;
        let key = ChannelKey { table, filter };
        let listener = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.inner.channels();
        let state = match channels.get_mut(&key) {
            Some(channel) => {
                channel.listeners.insert(listener, handlers);
                crate::realtime_log!(
                    self.inner.debug,
                    channel = %key,
                    listener,
                    listeners = channel.listeners.len(),
                    "joined existing channel"
                );
                channel.state.subscribe()
            }
            None => {
                let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
                let pump = tokio::spawn(pump(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    state_tx.clone(),
                ));
                let mut listeners = HashMap::new();
                listeners.insert(listener, handlers);
                channels.insert(
                    key.clone(),
                    Channel {
                        listeners,
                        state: state_tx,
                        pump,
                    },
                );
                self.inner.opened.fetch_add(1, Ordering::Relaxed);
                crate::realtime_log!(self.inner.debug, channel = %key, listener, "subscribed");
                state_rx
            }
        };

        Ok(SubscriptionHandle {
            manager: Arc::downgrade(&self.inner),
            key,
            listener,
            state,
            detached: false,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels().len()
    }

    pub fn listener_count(&self, table: TableName, filter: Option<&str>) -> usize {
        let Ok(filter) = filter.map(str::parse::<RowFilter>).transpose() else {
            return 0;
        };
        self.inner
            .channels()
            .get(&ChannelKey { table, filter })
            .map_or(0, |channel| channel.listeners.len())
    }

    /// Channels created since the manager was built.
    pub fn opened_total(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Close every channel. Outstanding handles become inert.
    pub fn shutdown(&self) {
        let mut channels = self.inner.channels();
        for (key, channel) in channels.drain() {
            channel.pump.abort();
            channel.state.send_replace(ChannelState::Closed);
            crate::realtime_log!(self.inner.debug, channel = %key, "channel closed on shutdown");
        }
    }
}

async fn pump(manager: Weak<ManagerInner>, key: ChannelKey, state: watch::Sender<ChannelState>) {
    let Some(transport) = manager.upgrade().map(|inner| inner.transport.clone()) else {
        return;
    };

    let mut feed = match transport.open(key.table, key.filter.clone()).await {
        Ok(feed) => feed,
        Err(err) => {
            warn!(channel = %key, error = %err, "failed to open channel");
            state.send_replace(ChannelState::Failed(err.to_string()));
            return;
        }
    };
    state.send_replace(ChannelState::Open);

    while let Some(event) = feed.recv().await {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let Some(listeners) = inner.listeners(&key) else {
            break;
        };
        crate::realtime_log!(
            inner.debug,
            channel = %key,
            kind = %event.kind,
            id = ?event.record_id(),
            listeners = listeners.len(),
            "change received"
        );
        for handlers in &listeners {
            handlers.dispatch(&event);
        }
    }

    // Transport went away. Reconnecting is left to the transport; periodic
    // resync covers the gap.
    if !matches!(*state.borrow(), ChannelState::Closed) {
        warn!(channel = %key, "channel feed ended");
        state.send_replace(ChannelState::Closed);
    }
}

/// One registration on a channel. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    manager: Weak<ManagerInner>,
    key: ChannelKey,
    listener: u64,
    state: watch::Receiver<ChannelState>,
    detached: bool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Wait until the channel's transport subscription is open.
    pub async fn ready(&mut self) -> Result<()> {
        let state = self
            .state
            .wait_for(|state| !matches!(state, ChannelState::Connecting))
            .await
            .map_err(|_| SyncError::Transport(format!("{} dropped", self.key)))?
            .clone();

        match state {
            ChannelState::Open => Ok(()),
            ChannelState::Failed(message) => Err(SyncError::Transport(message)),
            ChannelState::Closed => Err(SyncError::Transport(format!("{} closed", self.key))),
            ChannelState::Connecting => unreachable!("wait_for skips connecting"),
        }
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(inner) = self.manager.upgrade() {
            inner.detach(&self.key, self.listener);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
