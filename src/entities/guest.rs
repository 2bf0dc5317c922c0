use super::single_table_entity;
use crate::core::{SyncError, TableName};
use crate::store::StoreKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub housing_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Guest {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            preferred_name: None,
            housing_status: None,
            location: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.preferred_name.as_deref() {
            Some(preferred) if !preferred.trim().is_empty() => preferred.trim().to_string(),
            _ => format!("{} {}", self.first_name.trim(), self.last_name.trim()),
        }
    }

    pub(crate) fn duplicate_of(&self, existing: &Guest) -> Option<SyncError> {
        (existing.id != self.id && self.same_name(existing)).then(|| SyncError::DuplicateGuest {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
        })
    }

    fn same_name(&self, other: &Guest) -> bool {
        fn norm(s: &str) -> String {
            s.trim().to_lowercase()
        }
        norm(&self.first_name) == norm(&other.first_name)
            && norm(&self.last_name) == norm(&other.last_name)
    }
}

// The registry rejects exact first+last name collisions before the
// backend call.
single_table_entity!(Guest, StoreKind::Guests, TableName::Guests, |g| g.created_at, {
    fn conflict_with(&self, existing: &Self) -> Option<SyncError> {
        self.duplicate_of(existing)
    }
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Entity;
    use serde_json::json;

    #[test]
    fn test_duplicate_detection_ignores_case_and_whitespace() {
        let mut existing = Guest::new("Maria", "Lopez");
        existing.id = "g1".into();
        let candidate = Guest::new("  maria ", "LOPEZ");

        assert!(matches!(
            candidate.duplicate_of(&existing),
            Some(SyncError::DuplicateGuest { .. })
        ));
        assert!(Guest::new("Mario", "Lopez").duplicate_of(&existing).is_none());
    }

    #[test]
    fn test_row_round_trip_and_patch() {
        let row = json!({
            "id": "g1",
            "first_name": "Sam",
            "last_name": "Rivera",
            "created_at": "2024-04-01T09:00:00Z",
            "unmodelled": 7
        });
        let guest = Guest::from_row(TableName::Guests, row.as_object().unwrap()).unwrap();
        assert_eq!(guest.display_name(), "Sam Rivera");

        let patch = json!({"preferred_name": "Sammy", "id": "ignored"});
        let patched = guest.apply_patch(patch.as_object().unwrap()).unwrap();
        assert_eq!(patched.id, "g1");
        assert_eq!(patched.display_name(), "Sammy");
    }

    #[test]
    fn test_wrong_table_is_malformed() {
        let row = json!({"id": "g1", "first_name": "A", "last_name": "B", "created_at": "2024-04-01T09:00:00Z"});
        let err = Guest::from_row(TableName::Donations, row.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, SyncError::MalformedRow { .. }));
    }
}
