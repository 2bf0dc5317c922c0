//! Per-entity cache stores.
//!
//! A [`CacheStore`] holds the in-memory records of one entity family,
//! loads them lazily by date range, applies local mutations optimistically
//! and folds pushed change events in without refetching.

pub mod kind;
pub mod mutation;
pub mod range;

use crate::backend::{Backend, SelectQuery};
use crate::config::SyncConfig;
use crate::core::{ChangeEvent, ChangeKind, ID_COLUMN, RawRow, Result, SyncError, TableName};
use chrono::{DateTime, Utc};
use im::Vector;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

pub use kind::{StoreKind, SyncStrategy};
pub use mutation::PendingMutation;
pub use range::{FetchPlan, LoadPlan, LoadTracker, Touch};

/// Prefix of ids given to optimistic inserts until the server assigns one.
pub const PROVISIONAL_ID_PREFIX: &str = "local-";

/// A cached row type.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Store the entity lives in.
    const KIND: StoreKind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// The date-like field the store's loaded window is measured on.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Table writes for this record go to.
    fn table(&self) -> TableName;

    fn from_row(table: TableName, row: &RawRow) -> Result<Self>;

    fn to_row(&self) -> Result<RawRow>;

    /// The record with `patch` merged over its columns.
    fn apply_patch(&self, patch: &RawRow) -> Result<Self> {
        let mut row = self.to_row()?;
        for (key, value) in patch {
            if key != ID_COLUMN {
                row.insert(key.clone(), value.clone());
            }
        }
        Self::from_row(self.table(), &row)
    }

    /// Error to raise instead of inserting `self` next to `existing`.
    fn conflict_with(&self, _existing: &Self) -> Option<SyncError> {
        None
    }
}

/// Decode a row with serde, reporting failures against `table`.
pub fn decode_row<T: DeserializeOwned>(table: TableName, row: &RawRow) -> Result<T> {
    serde_json::from_value(Value::Object(row.clone()))
        .map_err(|err| SyncError::malformed(table, err.to_string()))
}

pub fn encode_row<T: Serialize>(table: TableName, value: &T) -> Result<RawRow> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(SyncError::malformed(
            table,
            format!("expected an object, got {}", other),
        )),
    }
}

/// Options for [`CacheStore::ensure_loaded`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub force: bool,
    pub since: Option<DateTime<Utc>>,
}

impl LoadOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            since: None,
        }
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            force: false,
            since: Some(since),
        }
    }

    /// Load all history.
    pub fn full_history() -> Self {
        Self::since(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The requested range was already loaded.
    Covered,
    /// Another load was in flight and covered the request once it finished.
    Coalesced,
    Loaded { fetched: usize },
    /// The fetch failed; the loaded window is unchanged.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The event matched the cached state already.
    Unchanged,
    /// Not for this store, outside the loaded window, or nothing loaded.
    Ignored,
    /// The event cannot be applied to the cached state; reload instead.
    NeedsReload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub unchanged: usize,
    pub ignored: usize,
    pub needs_reload: bool,
}

struct StoreState<E: Entity> {
    records: Vector<E>,
    tracker: LoadTracker,
}

impl<E: Entity> StoreState<E> {
    fn upsert(&mut self, record: E) -> bool {
        match mutation::position(&self.records, record.id()) {
            Some(index) if self.records[index] == record => false,
            Some(index) => {
                self.records.set(index, record);
                true
            }
            None => {
                self.records.push_front(record);
                true
            }
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        match mutation::position(&self.records, id) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Clears the in-flight load marker if the load future is dropped before
/// it finishes.
struct InFlightGuard<'a, E: Entity> {
    store: &'a CacheStore<E>,
    armed: bool,
}

impl<E: Entity> Drop for InFlightGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.store.state();
            state.tracker.abort();
            // Cleared together with the tracker, under the lock.
            self.store.loading.send_replace(false);
        }
    }
}

/// In-memory authoritative collection for one entity family.
pub struct CacheStore<E: Entity> {
    backend: Arc<dyn Backend>,
    config: Arc<SyncConfig>,
    state: Mutex<StoreState<E>>,
    revision: watch::Sender<u64>,
    loading: watch::Sender<bool>,
}

impl<E: Entity> CacheStore<E> {
    pub fn new(backend: Arc<dyn Backend>, config: Arc<SyncConfig>) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(StoreState {
                records: Vector::new(),
                tracker: LoadTracker::new(),
            }),
            revision: watch::Sender::new(0),
            loading: watch::Sender::new(false),
        }
    }

    pub fn kind(&self) -> StoreKind {
        E::KIND
    }

    fn state(&self) -> MutexGuard<'_, StoreState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Snapshot of the cached records, most recent first.
    pub fn records(&self) -> Vector<E> {
        self.state().records.clone()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.state().records.iter().find(|r| r.id() == id).cloned()
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<E>
    where
        F: Fn(&E) -> bool,
    {
        self.state()
            .records
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().tracker.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        self.state().tracker.is_loading()
    }

    pub fn loaded_since(&self) -> Option<DateTime<Utc>> {
        self.state().tracker.loaded_since()
    }

    /// Current revision; bumped once per effective change to `records`.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Observe record changes. The value is the store revision.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn default_since(&self) -> DateTime<Utc> {
        self.config
            .operational_window
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Make sure records since `options.since` (or the operational window)
    /// are cached. Read failures are logged and reported in the outcome,
    /// never raised.
    ///
    /// A request arriving while another load is in flight waits for it and
    /// then plans again. A forced reload always fetches after the earlier
    /// load finishes, since that load may have read rows before a change
    /// was committed. A wider `since` fetches whatever the earlier load did
    /// not cover.
    pub async fn ensure_loaded(&self, options: LoadOptions) -> LoadOutcome {
        let default_since = self.default_since();
        let mut waited = false;

        let plan = loop {
            let (plan, mut waiter) = {
                let mut state = self.state();
                let plan = state.tracker.plan(options.force, options.since, default_since);
                if let LoadPlan::Fetch(_) = plan {
                    self.loading.send_replace(true);
                }
                (plan, self.loading.subscribe())
            };

            match plan {
                LoadPlan::Covered if waited => return LoadOutcome::Coalesced,
                LoadPlan::Covered => return LoadOutcome::Covered,
                LoadPlan::Coalesced => {
                    debug!(store = %E::KIND, force = options.force, "load already in flight, waiting");
                    let _ = waiter.wait_for(|in_flight| !*in_flight).await;
                    waited = true;
                }
                LoadPlan::Fetch(plan) => break plan,
            }
        };

        let mut guard = InFlightGuard {
            store: self,
            armed: true,
        };

        let fetched = self.fetch(&plan).await;
        guard.armed = false;

        let mut state = self.state();
        let outcome = match fetched {
            Ok(fetched) => {
                let count = fetched.len();
                let touches = state.tracker.finish(&plan);
                let current = state.records.clone();
                state.records = merge_loaded(current, fetched, &plan, &touches);
                debug!(
                    store = %E::KIND,
                    fetched = count,
                    cached = state.records.len(),
                    merge = plan.merge,
                    "load finished"
                );
                self.loading.send_replace(false);
                drop(state);
                self.notify();
                LoadOutcome::Loaded { fetched: count }
            }
            Err(err) => {
                state.tracker.abort();
                self.loading.send_replace(false);
                drop(state);
                warn!(store = %E::KIND, error = %err, "load failed");
                LoadOutcome::Failed(err.to_string())
            }
        };
        outcome
    }

    /// Forced reload of the loaded range.
    pub async fn reload(&self) -> LoadOutcome {
        self.ensure_loaded(LoadOptions::forced()).await
    }

    async fn fetch(&self, plan: &FetchPlan) -> Result<Vec<E>> {
        let since = (!plan.is_full_history()).then_some(plan.since);
        let mut records = Vec::new();

        for &table in E::KIND.tables() {
            let query = SelectQuery::new(table, self.config.row_cap)
                .since(since)
                .before(plan.before);
            let rows = self.backend.select(&query).await?;
            if rows.len() >= self.config.row_cap {
                warn!(%table, cap = self.config.row_cap, "bulk read hit the row cap");
            }
            for row in &rows {
                match E::from_row(table, row) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!(%table, error = %err, "skipping malformed row"),
                }
            }
        }

        Ok(records)
    }

    /// Insert `entity` through the backend and cache the canonical row.
    /// Not optimistic: the primary key is assigned by the server.
    pub async fn add(&self, entity: E) -> Result<E> {
        self.check_conflicts(&entity)?;

        let table = entity.table();
        let row = insert_payload(&entity)?;
        let stored = self.backend.insert(table, row).await?;
        let confirmed = E::from_row(table, &stored)?;

        let changed = {
            let mut state = self.state();
            if state.tracker.admits(confirmed.timestamp()) {
                state.tracker.touch(confirmed.id(), Touch::Upserted);
                state.upsert(confirmed.clone())
            } else {
                debug!(store = %E::KIND, id = confirmed.id(), "added row is outside the loaded window");
                false
            }
        };
        if changed {
            self.notify();
        }
        Ok(confirmed)
    }

    /// Insert `entity` locally under a provisional id, then through the
    /// backend. The provisional record is swapped for the server row on
    /// success and removed on rejection.
    pub async fn add_optimistic(&self, mut entity: E) -> Result<E> {
        let provisional_id = format!("{}{}", PROVISIONAL_ID_PREFIX, Uuid::new_v4());
        entity.set_id(provisional_id.clone());
        let table = entity.table();

        let pending = {
            let mut state = self.state();
            check_conflicts_in(&state.records, &entity)?;
            if state.tracker.admits(entity.timestamp()) {
                Some(PendingMutation::begin_insert(&mut state.records, entity.clone()))
            } else {
                None
            }
        };
        if pending.is_some() {
            self.notify();
        }

        let result = match insert_payload(&entity) {
            Ok(row) => self.backend.insert(table, row).await,
            Err(err) => Err(err),
        };
        let result = result.and_then(|stored| E::from_row(table, &stored));

        match result {
            Ok(confirmed) => {
                {
                    let mut state = self.state();
                    state.remove(&provisional_id);
                    if state.tracker.admits(confirmed.timestamp()) {
                        state.tracker.touch(confirmed.id(), Touch::Upserted);
                        state.upsert(confirmed.clone());
                    }
                }
                self.notify();
                Ok(confirmed)
            }
            Err(err) => {
                if let Some(pending) = pending {
                    let changed = pending.rollback(&mut self.state().records);
                    if changed {
                        self.notify();
                    }
                }
                warn!(store = %E::KIND, %table, error = %err, "optimistic insert rolled back");
                Err(err)
            }
        }
    }

    /// Patch the cached record immediately, then through the backend.
    /// The server row replaces the optimistic one on success; on failure
    /// the pre-update snapshot is restored and the error returned.
    pub async fn update(&self, id: &str, patch: RawRow) -> Result<E> {
        let (table, pending) = {
            let mut state = self.state();
            let table = state
                .records
                .iter()
                .find(|r| r.id() == id)
                .map(|r| r.table())
                .ok_or_else(|| self.not_found(id))?;
            let pending = PendingMutation::begin_update(&mut state.records, id, &patch)?;
            state.tracker.touch(id, Touch::Upserted);
            (table, pending)
        };
        self.notify();

        match self.backend.update(table, id, patch).await {
            Ok(stored) => {
                let confirmed = match E::from_row(table, &stored) {
                    Ok(confirmed) => confirmed,
                    Err(err) => {
                        warn!(store = %E::KIND, id, error = %err, "server row unreadable, keeping local patch");
                        return self.get(id).ok_or_else(|| self.not_found(id));
                    }
                };
                let changed = {
                    let mut state = self.state();
                    // A concurrent remove wins; do not resurrect.
                    mutation::position(&state.records, id).is_some()
                        && state.upsert(confirmed.clone())
                };
                if changed {
                    self.notify();
                }
                Ok(confirmed)
            }
            Err(err) => {
                let restored = pending.is_some_and(|pending| pending.rollback(&mut self.state().records));
                if restored {
                    self.notify();
                }
                warn!(store = %E::KIND, %table, id, error = %err, "update rolled back");
                Err(err)
            }
        }
    }

    /// Remove the cached record immediately, then through the backend.
    /// On failure the record is restored at its previous position and the
    /// error returned.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (table, pending) = {
            let mut state = self.state();
            let table = state
                .records
                .iter()
                .find(|r| r.id() == id)
                .map(|r| r.table())
                .ok_or_else(|| self.not_found(id))?;
            let pending = PendingMutation::begin_remove(&mut state.records, id)
                .ok_or_else(|| self.not_found(id))?;
            state.tracker.touch(id, Touch::Removed);
            (table, pending)
        };
        self.notify();

        match self.backend.delete(table, id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let restored = {
                    let mut state = self.state();
                    let restored = pending.rollback(&mut state.records);
                    if restored {
                        state.tracker.touch(id, Touch::Upserted);
                    }
                    restored
                };
                if restored {
                    self.notify();
                }
                warn!(store = %E::KIND, %table, id, error = %err, "remove rolled back");
                Err(err)
            }
        }
    }

    /// Fold one pushed change event into the cache.
    pub fn apply_remote_patch(&self, event: &ChangeEvent) -> PatchOutcome {
        let outcome = self.apply_remote_batch(std::slice::from_ref(event));
        if outcome.needs_reload {
            PatchOutcome::NeedsReload
        } else if outcome.applied > 0 {
            PatchOutcome::Applied
        } else if outcome.unchanged > 0 {
            PatchOutcome::Unchanged
        } else {
            PatchOutcome::Ignored
        }
    }

    /// Fold a batch of events in arrival order. Either the whole batch
    /// applies, with one change notification, or nothing does and
    /// `needs_reload` is set.
    pub fn apply_remote_batch(&self, events: &[ChangeEvent]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut state = self.state();
        if state.tracker.window_start().is_none() {
            outcome.ignored = events.len();
            return outcome;
        }

        let mut records = state.records.clone();
        let mut touched = Vec::new();

        for event in events {
            match self.plan_patch(&state.tracker, &mut records, event) {
                Ok((PatchOutcome::Applied, touch)) => {
                    outcome.applied += 1;
                    if let (Some(id), Some(touch)) = (event.record_id(), touch) {
                        touched.push((id.to_string(), touch));
                    }
                }
                Ok((PatchOutcome::Unchanged, _)) => outcome.unchanged += 1,
                Ok((PatchOutcome::Ignored, _)) => outcome.ignored += 1,
                Ok((PatchOutcome::NeedsReload, _)) => {
                    debug!(store = %E::KIND, table = %event.table, id = ?event.record_id(), "cached state is stale");
                    outcome.needs_reload = true;
                    return outcome;
                }
                Err(err) => {
                    warn!(store = %E::KIND, table = %event.table, error = %err, "unreadable change event");
                    outcome.needs_reload = true;
                    return outcome;
                }
            }
        }

        if outcome.applied > 0 {
            state.records = records;
            for (id, touch) in touched {
                state.tracker.touch(&id, touch);
            }
            drop(state);
            self.notify();
        }
        outcome
    }

    fn plan_patch(
        &self,
        tracker: &LoadTracker,
        records: &mut Vector<E>,
        event: &ChangeEvent,
    ) -> Result<(PatchOutcome, Option<Touch>)> {
        if !E::KIND.tables().contains(&event.table) {
            return Ok((PatchOutcome::Ignored, None));
        }

        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = event
                    .new_row
                    .as_ref()
                    .ok_or_else(|| SyncError::malformed(event.table, "change event without a new row"))?;
                let incoming = E::from_row(event.table, row)?;
                let index = mutation::position(records, incoming.id());

                if !tracker.admits(incoming.timestamp()) {
                    // Moved out of the window: drop any cached copy.
                    return Ok(match index {
                        Some(index) => {
                            records.remove(index);
                            (PatchOutcome::Applied, Some(Touch::Removed))
                        }
                        None => (PatchOutcome::Ignored, None),
                    });
                }

                match (index, event.kind) {
                    (Some(index), _) if records[index] == incoming => {
                        Ok((PatchOutcome::Unchanged, None))
                    }
                    (Some(index), _) => {
                        records.set(index, incoming);
                        Ok((PatchOutcome::Applied, Some(Touch::Upserted)))
                    }
                    (None, ChangeKind::Insert) => {
                        records.push_front(incoming);
                        Ok((PatchOutcome::Applied, Some(Touch::Upserted)))
                    }
                    (None, _) => Ok((PatchOutcome::NeedsReload, None)),
                }
            }
            ChangeKind::Delete => {
                let id = event
                    .record_id()
                    .ok_or_else(|| SyncError::malformed(event.table, "delete event without an id"))?;
                match mutation::position(records, id) {
                    Some(index) => {
                        records.remove(index);
                        Ok((PatchOutcome::Applied, Some(Touch::Removed)))
                    }
                    None => Ok((PatchOutcome::Unchanged, None)),
                }
            }
        }
    }

    /// Whether `event` only restates what the cache already holds, as the
    /// push echo of a local write does.
    pub fn is_echo(&self, event: &ChangeEvent) -> bool {
        let state = self.state();
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => event
                .new_row
                .as_ref()
                .and_then(|row| E::from_row(event.table, row).ok())
                .is_some_and(|incoming| {
                    state
                        .records
                        .iter()
                        .any(|record| record.id() == incoming.id() && *record == incoming)
                }),
            ChangeKind::Delete => event
                .record_id()
                .is_some_and(|id| mutation::position(&state.records, id).is_none()),
        }
    }

    fn check_conflicts(&self, entity: &E) -> Result<()> {
        check_conflicts_in(&self.state().records, entity)
    }

    fn not_found(&self, id: &str) -> SyncError {
        SyncError::NotFound {
            table: E::KIND.tables()[0],
            id: id.to_string(),
        }
    }
}

fn check_conflicts_in<E: Entity>(records: &Vector<E>, entity: &E) -> Result<()> {
    match records.iter().find_map(|existing| entity.conflict_with(existing)) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Backend insert payload: the entity's columns without a client id, so
/// the server assigns the primary key.
fn insert_payload<E: Entity>(entity: &E) -> Result<RawRow> {
    let mut row = entity.to_row()?;
    let client_id = row
        .get(ID_COLUMN)
        .and_then(Value::as_str)
        .is_none_or(|id| id.is_empty() || id.starts_with(PROVISIONAL_ID_PREFIX));
    if client_id {
        row.remove(ID_COLUMN);
    }
    Ok(row)
}

/// Combine a finished fetch with the records cached while it ran.
fn merge_loaded<E: Entity>(
    current: Vector<E>,
    fetched: Vec<E>,
    plan: &FetchPlan,
    touches: &HashMap<String, Touch>,
) -> Vector<E> {
    let mut merged: Vector<E> = if plan.merge {
        let known: HashSet<String> = current.iter().map(|r| r.id().to_string()).collect();
        let mut merged = current.clone();
        merged.extend(fetched.into_iter().filter(|r| !known.contains(r.id())));
        merged
    } else {
        let mut seen = HashSet::new();
        fetched
            .into_iter()
            .filter(|r| seen.insert(r.id().to_string()))
            .collect()
    };

    for (id, touch) in touches {
        let index = mutation::position(&merged, id);
        match touch {
            Touch::Removed => {
                if let Some(index) = index {
                    merged.remove(index);
                }
            }
            Touch::Upserted => {
                let Some(local) = current.iter().find(|r| r.id() == id) else {
                    continue;
                };
                match index {
                    Some(index) => {
                        merged.set(index, local.clone());
                    }
                    None => merged.push_back(local.clone()),
                }
            }
        }
    }

    // Provisional records are still waiting on their insert.
    for record in current.iter().filter(|r| r.id().starts_with(PROVISIONAL_ID_PREFIX)) {
        if mutation::position(&merged, record.id()).is_none() {
            merged.push_back(record.clone());
        }
    }

    let mut sorted: Vec<E> = merged.into_iter().collect();
    sorted.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    sorted.into_iter().collect()
}
