//! Entity families cached by the console.

mod donation;
mod guest;
mod guest_meta;
mod meal;
mod note;
mod schedule;
mod service;

pub use donation::Donation;
pub use guest::Guest;
pub use guest_meta::{GuestOwned, GuestProxy, GuestReminder, GuestWarning};
pub use meal::{MealKind, MealRecord};
pub use note::DailyNote;
pub use schedule::BlockedSlot;
pub use service::{ServiceKind, ServiceRecord};

/// `Entity` for a struct that maps one-to-one onto the columns of a
/// single table and has a `String` field named `id`.
macro_rules! single_table_entity {
    ($ty:ty, $kind:expr, $table:expr, |$this:ident| $timestamp:expr $(, { $($extra:tt)* })?) => {
        impl $crate::store::Entity for $ty {
            const KIND: $crate::store::StoreKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
                let $this = self;
                $timestamp
            }

            fn table(&self) -> $crate::core::TableName {
                $table
            }

            fn from_row(
                table: $crate::core::TableName,
                row: &$crate::core::RawRow,
            ) -> $crate::core::Result<Self> {
                if table != $table {
                    return Err($crate::core::SyncError::malformed(
                        table,
                        format!("row does not belong to '{}'", $table),
                    ));
                }
                $crate::store::decode_row(table, row)
            }

            fn to_row(&self) -> $crate::core::Result<$crate::core::RawRow> {
                $crate::store::encode_row($table, self)
            }

            $($($extra)*)?
        }
    };
}

pub(crate) use single_table_entity;
