use super::single_table_entity;
use crate::core::{TableName, date_start};
use crate::store::{CacheStore, StoreKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyNote {
    #[serde(default)]
    pub id: String,
    pub note_date: NaiveDate,
    pub service: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl DailyNote {
    pub fn new(note_date: NaiveDate, service: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            note_date,
            service: service.into(),
            body: body.into(),
            created_by: None,
        }
    }
}

single_table_entity!(DailyNote, StoreKind::DailyNotes, TableName::DailyNotes, |n| {
    date_start(n.note_date)
});

impl CacheStore<DailyNote> {
    pub fn notes_for(&self, date: NaiveDate, service: &str) -> Vec<DailyNote> {
        self.filter(|n| n.note_date == date && n.service == service)
    }
}
