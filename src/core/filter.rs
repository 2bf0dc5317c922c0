use crate::core::{RawRow, Result, SyncError};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Equality predicate in the `column=eq.value` form used for realtime
/// subscriptions. The canonical string form doubles as part of the
/// channel identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    column: String,
    value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn matches(&self, row: &RawRow) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(Value::Null) | None => self.value == "null",
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for RowFilter {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| SyncError::InvalidFilter(format!("missing '=' in '{}'", s)))?;
        let value = rest.strip_prefix("eq.").ok_or_else(|| {
            SyncError::InvalidFilter(format!("only 'eq.' predicates are supported: '{}'", s))
        })?;

        let column = column.trim();
        if column.is_empty() {
            return Err(SyncError::InvalidFilter(format!("empty column in '{}'", s)));
        }

        Ok(Self::eq(column, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let filter: RowFilter = "guest_id=eq.g-42".parse().unwrap();
        assert_eq!(filter.column(), "guest_id");
        assert_eq!(filter.value(), "g-42");
        assert_eq!(filter.to_string(), "guest_id=eq.g-42");
    }

    #[test]
    fn test_parse_rejects_unsupported_forms() {
        assert!("guest_id".parse::<RowFilter>().is_err());
        assert!("guest_id=gt.3".parse::<RowFilter>().is_err());
        assert!("=eq.3".parse::<RowFilter>().is_err());
    }

    #[test]
    fn test_matches_strings_numbers_and_null() {
        let row = json!({"guest_id": "g1", "quantity": 3, "done": false, "notes": null});
        let row = row.as_object().unwrap();

        assert!(RowFilter::eq("guest_id", "g1").matches(row));
        assert!(!RowFilter::eq("guest_id", "g2").matches(row));
        assert!(RowFilter::eq("quantity", "3").matches(row));
        assert!(RowFilter::eq("done", "false").matches(row));
        assert!(RowFilter::eq("notes", "null").matches(row));
        assert!(RowFilter::eq("missing", "null").matches(row));
    }
}
