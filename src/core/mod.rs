pub mod error;
pub mod filter;
pub mod types;

pub use error::{Result, SyncError};
pub use filter::RowFilter;
pub use types::{
    ChangeEvent, ChangeKind, ID_COLUMN, RawRow, TableName, date_start, parse_timestamp, row_id,
    row_timestamp,
};
