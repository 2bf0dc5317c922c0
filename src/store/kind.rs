use crate::core::TableName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity families, one cache store each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Guests,
    Meals,
    Services,
    Donations,
    Reminders,
    Warnings,
    GuestProxies,
    BlockedSlots,
    DailyNotes,
}

/// How a debounced batch of change events reaches the owning store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Apply each row delta in place, no network round-trip.
    Patch,
    /// Force a reload of the store's loaded range.
    Reload,
}

impl StoreKind {
    pub const ALL: [StoreKind; 9] = [
        StoreKind::Guests,
        StoreKind::Meals,
        StoreKind::Services,
        StoreKind::Donations,
        StoreKind::Reminders,
        StoreKind::Warnings,
        StoreKind::GuestProxies,
        StoreKind::BlockedSlots,
        StoreKind::DailyNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Guests => "guests",
            StoreKind::Meals => "meals",
            StoreKind::Services => "services",
            StoreKind::Donations => "donations",
            StoreKind::Reminders => "reminders",
            StoreKind::Warnings => "warnings",
            StoreKind::GuestProxies => "guest_proxies",
            StoreKind::BlockedSlots => "blocked_slots",
            StoreKind::DailyNotes => "daily_notes",
        }
    }

    /// Tables whose rows live in this store.
    pub fn tables(&self) -> &'static [TableName] {
        match self {
            StoreKind::Guests => &[TableName::Guests],
            StoreKind::Meals => &[TableName::MealAttendance],
            StoreKind::Services => &[
                TableName::ShowerReservations,
                TableName::LaundryBookings,
                TableName::BicycleRepairs,
                TableName::HaircutVisits,
                TableName::HolidayVisits,
            ],
            StoreKind::Donations => &[TableName::Donations],
            StoreKind::Reminders => &[TableName::GuestReminders],
            StoreKind::Warnings => &[TableName::GuestWarnings],
            StoreKind::GuestProxies => &[TableName::GuestProxies],
            StoreKind::BlockedSlots => &[TableName::BlockedSlots],
            StoreKind::DailyNotes => &[TableName::DailyNotes],
        }
    }

    /// The store that owns `table`. Each table has exactly one owner.
    pub fn owner_of(table: TableName) -> StoreKind {
        match table {
            TableName::Guests => StoreKind::Guests,
            TableName::MealAttendance => StoreKind::Meals,
            TableName::ShowerReservations
            | TableName::LaundryBookings
            | TableName::BicycleRepairs
            | TableName::HaircutVisits
            | TableName::HolidayVisits => StoreKind::Services,
            TableName::Donations => StoreKind::Donations,
            TableName::GuestReminders => StoreKind::Reminders,
            TableName::GuestWarnings => StoreKind::Warnings,
            TableName::GuestProxies => StoreKind::GuestProxies,
            TableName::BlockedSlots => StoreKind::BlockedSlots,
            TableName::DailyNotes => StoreKind::DailyNotes,
        }
    }

    /// Blocked slots feed a recomputed availability set, so a row delta is
    /// not enough for their consumers.
    pub fn default_strategy(&self) -> SyncStrategy {
        match self {
            StoreKind::BlockedSlots => SyncStrategy::Reload,
            _ => SyncStrategy::Patch,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
