use super::single_table_entity;
use crate::core::{TableName, date_start};
use crate::store::{CacheStore, StoreKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A service slot closed for booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedSlot {
    #[serde(default)]
    pub id: String,
    pub service_type: String,
    pub slot_date: NaiveDate,
    pub slot_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BlockedSlot {
    pub fn new(
        service_type: impl Into<String>,
        slot_date: NaiveDate,
        slot_time: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            service_type: service_type.into(),
            slot_date,
            slot_time: slot_time.into(),
            reason: None,
        }
    }
}

single_table_entity!(BlockedSlot, StoreKind::BlockedSlots, TableName::BlockedSlots, |s| {
    date_start(s.slot_date)
});

impl CacheStore<BlockedSlot> {
    /// `(date, time)` pairs blocked for `service_type`.
    pub fn blocked_set(&self, service_type: &str) -> HashSet<(NaiveDate, String)> {
        self.filter(|s| s.service_type == service_type)
            .into_iter()
            .map(|s| (s.slot_date, s.slot_time))
            .collect()
    }

    pub fn is_blocked(&self, service_type: &str, date: NaiveDate, time: &str) -> bool {
        !self
            .filter(|s| s.service_type == service_type && s.slot_date == date && s.slot_time == time)
            .is_empty()
    }
}
