use super::{Backend, ChangeFeed, ChangeTransport, SelectQuery};
use crate::core::{
    ChangeEvent, ID_COLUMN, RawRow, Result, RowFilter, SyncError, TableName, row_id,
    row_timestamp,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Decides whether an insert is accepted, given the candidate row and the
/// rows already in the table. `Some(reason)` rejects.
pub type InsertGuard = Arc<dyn Fn(&RawRow, &[RawRow]) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Select,
    Insert,
    Update,
    Delete,
}

struct FeedSender {
    table: TableName,
    filter: Option<RowFilter>,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl FeedSender {
    fn wants(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        event
            .new_row
            .as_ref()
            .or(event.old_row.as_ref())
            .is_some_and(|row| filter.matches(row))
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<TableName, Vec<RawRow>>,
    feeds: Vec<FeedSender>,
    pending_failures: Vec<(BackendOp, TableName, String)>,
    guards: HashMap<TableName, InsertGuard>,
    select_calls: HashMap<TableName, usize>,
    opened_feeds: usize,
}

impl MemoryState {
    fn take_failure(&mut self, op: BackendOp, table: TableName) -> Option<SyncError> {
        let pos = self
            .pending_failures
            .iter()
            .position(|(o, t, _)| *o == op && *t == table)?;
        let (_, _, message) = self.pending_failures.remove(pos);
        Some(SyncError::backend(table, message))
    }

    fn emit(&mut self, event: ChangeEvent) {
        self.feeds.retain(|feed| !feed.sender.is_closed());
        for feed in self.feeds.iter().filter(|feed| feed.wants(&event)) {
            let _ = feed.sender.send(event.clone());
        }
    }
}

/// In-process backend and push transport.
///
/// Every write is echoed to open feeds as a change event, the way the
/// hosted service echoes committed rows. `remote_*` methods write as if
/// from another device: no latency, no injected failures.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `Backend` call by `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Load rows without emitting change events.
    pub fn seed(&self, table: TableName, rows: impl IntoIterator<Item = RawRow>) -> Result<()> {
        let mut state = self.state.lock()?;
        let stored = state.tables.entry(table).or_default();
        for mut row in rows {
            if row_id(&row).is_none() {
                row.insert(ID_COLUMN.into(), Value::String(Uuid::new_v4().to_string()));
            }
            stored.push(row);
        }
        Ok(())
    }

    /// Make the next `op` against `table` fail with a backend error.
    pub fn fail_next(&self, op: BackendOp, table: TableName, message: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock()?;
        state.pending_failures.push((op, table, message.into()));
        Ok(())
    }

    pub fn set_insert_guard(&self, table: TableName, guard: InsertGuard) -> Result<()> {
        let mut state = self.state.lock()?;
        state.guards.insert(table, guard);
        Ok(())
    }

    pub fn rows(&self, table: TableName) -> Result<Vec<RawRow>> {
        let state = self.state.lock()?;
        Ok(state.tables.get(&table).cloned().unwrap_or_default())
    }

    pub fn select_count(&self, table: TableName) -> usize {
        self.state
            .lock()
            .map(|state| state.select_calls.get(&table).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Transport-level subscriptions opened so far.
    pub fn opened_feeds(&self) -> usize {
        self.state.lock().map(|state| state.opened_feeds).unwrap_or(0)
    }

    /// Transport-level subscriptions still open.
    pub fn active_feeds(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .feeds
                    .iter()
                    .filter(|feed| !feed.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Push an arbitrary event to open feeds without touching storage.
    pub fn emit(&self, event: ChangeEvent) -> Result<()> {
        let mut state = self.state.lock()?;
        state.emit(event);
        Ok(())
    }

    pub fn remote_insert(&self, table: TableName, row: RawRow) -> Result<RawRow> {
        self.apply_insert(table, row)
    }

    pub fn remote_update(&self, table: TableName, id: &str, patch: RawRow) -> Result<RawRow> {
        self.apply_update(table, id, patch)
    }

    pub fn remote_delete(&self, table: TableName, id: &str) -> Result<()> {
        self.apply_delete(table, id)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failure(&self, op: BackendOp, table: TableName) -> Result<()> {
        let mut state = self.state.lock()?;
        match state.take_failure(op, table) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply_insert(&self, table: TableName, mut row: RawRow) -> Result<RawRow> {
        let mut state = self.state.lock()?;

        if row_id(&row).is_none_or(str::is_empty) {
            row.insert(ID_COLUMN.into(), Value::String(Uuid::new_v4().to_string()));
        }
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        if let Some(guard) = state.guards.get(&table).cloned() {
            let existing = state.tables.get(&table).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(reason) = guard(&row, existing) {
                return Err(SyncError::rejected(table, reason));
            }
        }

        let id = row_id(&row).unwrap_or_default().to_string();
        let stored = state.tables.entry(table).or_default();
        if stored.iter().any(|r| row_id(r) == Some(id.as_str())) {
            return Err(SyncError::rejected(
                table,
                format!("duplicate primary key '{}'", id),
            ));
        }
        stored.push(row.clone());
        state.emit(ChangeEvent::insert(table, row.clone()));
        Ok(row)
    }

    fn apply_update(&self, table: TableName, id: &str, patch: RawRow) -> Result<RawRow> {
        let mut state = self.state.lock()?;
        let stored = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .ok_or_else(|| SyncError::NotFound {
                table,
                id: id.to_string(),
            })?;

        let old = stored.clone();
        for (key, value) in patch {
            if key != ID_COLUMN {
                stored.insert(key, value);
            }
        }
        stored.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        let new = stored.clone();

        state.emit(ChangeEvent::update(table, Some(old), new.clone()));
        Ok(new)
    }

    fn apply_delete(&self, table: TableName, id: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        let removed = state.tables.get_mut(&table).and_then(|rows| {
            let pos = rows.iter().position(|r| row_id(r) == Some(id))?;
            Some(rows.remove(pos))
        });

        if let Some(old) = removed {
            state.emit(ChangeEvent::delete(table, old));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<RawRow>> {
        self.delay().await;
        let mut state = self.state.lock()?;
        *state.select_calls.entry(query.table).or_default() += 1;
        if let Some(err) = state.take_failure(BackendOp::Select, query.table) {
            return Err(err);
        }

        let column = query.date_column();
        let mut rows: Vec<(chrono::DateTime<Utc>, RawRow)> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let ts = row_timestamp(row, column)?;
                        query.covers(ts).then(|| (ts, row.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if query.descending {
            rows.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }
        rows.truncate(query.limit);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn insert(&self, table: TableName, row: RawRow) -> Result<RawRow> {
        self.delay().await;
        self.check_failure(BackendOp::Insert, table)?;
        self.apply_insert(table, row)
    }

    async fn update(&self, table: TableName, id: &str, patch: RawRow) -> Result<RawRow> {
        self.delay().await;
        self.check_failure(BackendOp::Update, table)?;
        self.apply_update(table, id, patch)
    }

    async fn delete(&self, table: TableName, id: &str) -> Result<()> {
        self.delay().await;
        self.check_failure(BackendOp::Delete, table)?;
        self.apply_delete(table, id)
    }
}

#[async_trait]
impl ChangeTransport for MemoryBackend {
    async fn open(&self, table: TableName, filter: Option<RowFilter>) -> Result<ChangeFeed> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock()?;
        state.opened_feeds += 1;
        state.feeds.push(FeedSender {
            table,
            filter,
            sender,
        });
        Ok(ChangeFeed::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChangeKind;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_echoes() {
        let backend = MemoryBackend::new();
        let mut feed = backend.open(TableName::Donations, None).await.unwrap();

        let stored = backend
            .insert(
                TableName::Donations,
                row(json!({"item": "socks", "donated_on": "2024-02-01"})),
            )
            .await
            .unwrap();
        let id = row_id(&stored).unwrap().to_string();
        assert!(!id.is_empty());
        assert!(stored.contains_key("created_at"));

        let event = feed.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_caps() {
        let backend = MemoryBackend::new();
        backend
            .seed(
                TableName::Donations,
                vec![
                    row(json!({"id": "a", "donated_on": "2024-01-01"})),
                    row(json!({"id": "b", "donated_on": "2024-01-05"})),
                    row(json!({"id": "c", "donated_on": "2024-01-09"})),
                    row(json!({"id": "d", "donated_on": "2024-01-12"})),
                ],
            )
            .unwrap();

        let since = crate::core::parse_timestamp("2024-01-05").unwrap();
        let rows = backend
            .select(&SelectQuery::new(TableName::Donations, 2).since(Some(since)))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().filter_map(row_id).collect();
        assert_eq!(ids, vec!["d", "c"]);
        assert_eq!(backend.select_count(TableName::Donations), 1);
    }

    #[tokio::test]
    async fn test_fail_next_applies_once() {
        let backend = MemoryBackend::new();
        backend
            .fail_next(BackendOp::Insert, TableName::Guests, "offline")
            .unwrap();

        let first = backend.insert(TableName::Guests, RawRow::new()).await;
        assert!(matches!(first, Err(SyncError::Backend { .. })));
        assert!(backend.insert(TableName::Guests, RawRow::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_guard_rejects() {
        let backend = MemoryBackend::new();
        backend
            .set_insert_guard(
                TableName::ShowerReservations,
                Arc::new(|_: &RawRow, existing: &[RawRow]| {
                    (!existing.is_empty()).then(|| "no slots left".to_string())
                }),
            )
            .unwrap();

        assert!(backend.insert(TableName::ShowerReservations, RawRow::new()).await.is_ok());
        let err = backend
            .insert(TableName::ShowerReservations, RawRow::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_filtered_feed_and_close() {
        let backend = MemoryBackend::new();
        let mut feed = backend
            .open(TableName::GuestWarnings, Some(RowFilter::eq("guest_id", "g1")))
            .await
            .unwrap();

        backend
            .remote_insert(TableName::GuestWarnings, row(json!({"id": "w0", "guest_id": "g2"})))
            .unwrap();
        backend
            .remote_insert(TableName::GuestWarnings, row(json!({"id": "w1", "guest_id": "g1"})))
            .unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.record_id(), Some("w1"));
        assert_eq!(backend.active_feeds(), 1);

        drop(feed);
        assert_eq!(backend.active_feeds(), 0);
        assert_eq!(backend.opened_feeds(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .update(TableName::Guests, "nope", RawRow::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
