use crate::core::{RawRow, Result, SyncError, TableName};
use crate::store::{CacheStore, Entity, StoreKind, decode_row, encode_row};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Service families sharing the services store, one table each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Shower,
    Laundry,
    Bicycle,
    Haircut,
    Holiday,
}

impl ServiceKind {
    pub fn table(&self) -> TableName {
        match self {
            ServiceKind::Shower => TableName::ShowerReservations,
            ServiceKind::Laundry => TableName::LaundryBookings,
            ServiceKind::Bicycle => TableName::BicycleRepairs,
            ServiceKind::Haircut => TableName::HaircutVisits,
            ServiceKind::Holiday => TableName::HolidayVisits,
        }
    }

    pub fn from_table(table: TableName) -> Option<Self> {
        match table {
            TableName::ShowerReservations => Some(ServiceKind::Shower),
            TableName::LaundryBookings => Some(ServiceKind::Laundry),
            TableName::BicycleRepairs => Some(ServiceKind::Bicycle),
            TableName::HaircutVisits => Some(ServiceKind::Haircut),
            TableName::HolidayVisits => Some(ServiceKind::Holiday),
            _ => None,
        }
    }
}

/// One shower, laundry, bicycle, haircut or holiday record. `kind` is not
/// a column; it follows from the table the row came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(default)]
    pub id: String,
    #[serde(skip)]
    pub kind: ServiceKind,
    pub guest_id: String,
    pub service_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ServiceRecord {
    pub fn new(kind: ServiceKind, guest_id: impl Into<String>, service_date: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            kind,
            guest_id: guest_id.into(),
            service_date,
            status: None,
            slot: None,
            notes: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }
}

impl Entity for ServiceRecord {
    const KIND: StoreKind = StoreKind::Services;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.service_date
    }

    fn table(&self) -> TableName {
        self.kind.table()
    }

    fn from_row(table: TableName, row: &RawRow) -> Result<Self> {
        let kind = ServiceKind::from_table(table)
            .ok_or_else(|| SyncError::malformed(table, "not a service table"))?;
        let mut record: ServiceRecord = decode_row(table, row)?;
        record.kind = kind;
        Ok(record)
    }

    fn to_row(&self) -> Result<RawRow> {
        encode_row(self.table(), self)
    }
}

impl CacheStore<ServiceRecord> {
    pub fn by_kind(&self, kind: ServiceKind) -> Vec<ServiceRecord> {
        self.filter(|r| r.kind == kind)
    }

    /// Records of `kind` booked into `slot` on `date`.
    pub fn booked_in_slot(&self, kind: ServiceKind, date: NaiveDate, slot: &str) -> usize {
        self.filter(|r| {
            r.kind == kind && r.service_date.date_naive() == date && r.slot.as_deref() == Some(slot)
        })
        .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_follows_table() {
        let row = json!({
            "id": "l1",
            "guest_id": "g1",
            "service_date": "2024-06-01T08:00:00Z",
            "status": "waiting"
        });
        let record = ServiceRecord::from_row(TableName::LaundryBookings, row.as_object().unwrap()).unwrap();
        assert_eq!(record.kind, ServiceKind::Laundry);
        assert_eq!(record.table(), TableName::LaundryBookings);

        let encoded = record.to_row().unwrap();
        assert!(!encoded.contains_key("kind"));
    }

    #[test]
    fn test_patch_keeps_kind() {
        let record = ServiceRecord::new(
            ServiceKind::Bicycle,
            "g2",
            "2024-06-01T08:00:00Z".parse().unwrap(),
        );
        let patch = json!({"status": "done"});
        let patched = record.apply_patch(patch.as_object().unwrap()).unwrap();
        assert_eq!(patched.kind, ServiceKind::Bicycle);
        assert_eq!(patched.status.as_deref(), Some("done"));
    }

    #[test]
    fn test_non_service_table_rejected() {
        let row = json!({"id": "x", "guest_id": "g", "service_date": "2024-06-01T08:00:00Z"});
        assert!(ServiceRecord::from_row(TableName::Guests, row.as_object().unwrap()).is_err());
    }
}
