//! Seams to the hosted persistence service.
//!
//! [`Backend`] covers create / read-filtered-by-date / update-by-id /
//! delete-by-id. [`ChangeTransport`] opens the per-table push stream.
//! [`memory::MemoryBackend`] implements both in-process.

pub mod memory;

use crate::core::{ChangeEvent, RawRow, Result, RowFilter, TableName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use memory::{BackendOp, InsertGuard, MemoryBackend};

/// Bulk read of one table bounded by its date column.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: TableName,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
    /// Most recent first
    pub descending: bool,
}

impl SelectQuery {
    pub fn new(table: TableName, limit: usize) -> Self {
        Self {
            table,
            since: None,
            before: None,
            limit,
            descending: true,
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn before(mut self, before: Option<DateTime<Utc>>) -> Self {
        self.before = before;
        self
    }

    pub fn date_column(&self) -> &'static str {
        self.table.date_column()
    }

    pub fn covers(&self, ts: DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| ts >= since) && self.before.is_none_or(|before| ts < before)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<RawRow>>;

    /// Inserts `row` and returns the canonical stored row, including the
    /// server-generated primary key.
    async fn insert(&self, table: TableName, row: RawRow) -> Result<RawRow>;

    async fn update(&self, table: TableName, id: &str, patch: RawRow) -> Result<RawRow>;

    async fn delete(&self, table: TableName, id: &str) -> Result<()>;
}

/// Receiving end of one transport-level subscription. Dropping it closes
/// the subscription.
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait ChangeTransport: Send + Sync {
    async fn open(&self, table: TableName, filter: Option<RowFilter>) -> Result<ChangeFeed>;
}
