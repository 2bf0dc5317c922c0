use crate::core::TableName;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Backend error on '{table}': {message}")]
    Backend { table: TableName, message: String },

    #[error("Write to '{table}' rejected: {reason}")]
    Rejected { table: TableName, reason: String },

    #[error("Record '{id}' not found in '{table}'")]
    NotFound { table: TableName, id: String },

    #[error("Guest '{first_name} {last_name}' already exists")]
    DuplicateGuest {
        first_name: String,
        last_name: String,
    },

    #[error("Malformed row for '{table}': {message}")]
    MalformedRow { table: TableName, message: String },

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl SyncError {
    pub fn backend(table: TableName, message: impl Into<String>) -> Self {
        Self::Backend {
            table,
            message: message.into(),
        }
    }

    pub fn rejected(table: TableName, reason: impl Into<String>) -> Self {
        Self::Rejected {
            table,
            reason: reason.into(),
        }
    }

    pub fn malformed(table: TableName, message: impl Into<String>) -> Self {
        Self::MalformedRow {
            table,
            message: message.into(),
        }
    }

    /// Transient failures a later call may succeed on. Rejections and
    /// local validation failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::backend(TableName::Guests, "timeout").is_retryable());
        assert!(SyncError::Transport("closed".into()).is_retryable());
        assert!(!SyncError::rejected(TableName::ShowerReservations, "full").is_retryable());
        assert!(
            !SyncError::DuplicateGuest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display_names_table() {
        let err = SyncError::NotFound {
            table: TableName::LaundryBookings,
            id: "l1".into(),
        };
        assert_eq!(err.to_string(), "Record 'l1' not found in 'laundry_bookings'");
    }
}
