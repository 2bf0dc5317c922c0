use crate::core::{Result, SyncError};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A row as the backend stores and pushes it: a flat JSON object.
pub type RawRow = Map<String, Value>;

/// Primary key column shared by every table.
pub const ID_COLUMN: &str = "id";

/// Every backend table the cache layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Guests,
    MealAttendance,
    ShowerReservations,
    LaundryBookings,
    BicycleRepairs,
    HaircutVisits,
    HolidayVisits,
    Donations,
    GuestReminders,
    GuestWarnings,
    GuestProxies,
    BlockedSlots,
    DailyNotes,
}

impl TableName {
    pub const ALL: [TableName; 13] = [
        TableName::Guests,
        TableName::MealAttendance,
        TableName::ShowerReservations,
        TableName::LaundryBookings,
        TableName::BicycleRepairs,
        TableName::HaircutVisits,
        TableName::HolidayVisits,
        TableName::Donations,
        TableName::GuestReminders,
        TableName::GuestWarnings,
        TableName::GuestProxies,
        TableName::BlockedSlots,
        TableName::DailyNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Guests => "guests",
            TableName::MealAttendance => "meal_attendance",
            TableName::ShowerReservations => "shower_reservations",
            TableName::LaundryBookings => "laundry_bookings",
            TableName::BicycleRepairs => "bicycle_repairs",
            TableName::HaircutVisits => "haircut_visits",
            TableName::HolidayVisits => "holiday_visits",
            TableName::Donations => "donations",
            TableName::GuestReminders => "guest_reminders",
            TableName::GuestWarnings => "guest_warnings",
            TableName::GuestProxies => "guest_proxies",
            TableName::BlockedSlots => "blocked_slots",
            TableName::DailyNotes => "daily_notes",
        }
    }

    /// Column used for `since` filtering and recent-first ordering.
    pub fn date_column(&self) -> &'static str {
        match self {
            TableName::Guests
            | TableName::GuestReminders
            | TableName::GuestWarnings
            | TableName::GuestProxies => "created_at",
            TableName::MealAttendance => "served_on",
            TableName::ShowerReservations
            | TableName::LaundryBookings
            | TableName::BicycleRepairs
            | TableName::HaircutVisits
            | TableName::HolidayVisits => "service_date",
            TableName::Donations => "donated_on",
            TableName::BlockedSlots => "slot_date",
            TableName::DailyNotes => "note_date",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        TableName::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| SyncError::UnknownTable(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(label)
    }
}

/// Normalized change notification for one row of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: TableName,
    pub kind: ChangeKind,
    pub new_row: Option<RawRow>,
    pub old_row: Option<RawRow>,
}

impl ChangeEvent {
    pub fn insert(table: TableName, row: RawRow) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn update(table: TableName, old_row: Option<RawRow>, new_row: RawRow) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new_row: Some(new_row),
            old_row,
        }
    }

    pub fn delete(table: TableName, old_row: RawRow) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new_row: None,
            old_row: Some(old_row),
        }
    }

    /// Primary key of the affected row, from whichever payload carries one.
    pub fn record_id(&self) -> Option<&str> {
        self.new_row
            .as_ref()
            .and_then(row_id)
            .or_else(|| self.old_row.as_ref().and_then(row_id))
    }
}

pub fn row_id(row: &RawRow) -> Option<&str> {
    row.get(ID_COLUMN).and_then(Value::as_str)
}

/// Reads a date-like column as a UTC instant. Accepts RFC 3339 timestamps
/// and plain `YYYY-MM-DD` dates (taken as midnight UTC).
pub fn row_timestamp(row: &RawRow, column: &str) -> Option<DateTime<Utc>> {
    row.get(column).and_then(Value::as_str).and_then(parse_timestamp)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(date_start)
}

pub fn date_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_table_name_round_trip() {
        for table in TableName::ALL {
            assert_eq!(table.as_str().parse::<TableName>().unwrap(), table);
        }
        assert!(matches!(
            "parking".parse::<TableName>(),
            Err(SyncError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_record_id_falls_back_to_old_row() {
        let event = ChangeEvent::delete(TableName::Donations, row(json!({"id": "d1"})));
        assert_eq!(event.record_id(), Some("d1"));

        let event = ChangeEvent::update(
            TableName::Donations,
            Some(row(json!({"id": "old"}))),
            row(json!({"id": "d2"})),
        );
        assert_eq!(event.record_id(), Some("d2"));
    }

    #[test]
    fn test_row_timestamp_accepts_dates_and_timestamps() {
        let r = row(json!({
            "served_on": "2024-03-05",
            "created_at": "2024-03-05T10:30:00Z",
            "bad": "yesterday"
        }));
        let date = row_timestamp(&r, "served_on").unwrap();
        let ts = row_timestamp(&r, "created_at").unwrap();
        assert!(date < ts);
        assert_eq!(date.to_rfc3339(), "2024-03-05T00:00:00+00:00");
        assert!(row_timestamp(&r, "bad").is_none());
        assert!(row_timestamp(&r, "missing").is_none());
    }
}
