// ============================================================================
// Optimistic Mutation Tracking
// ============================================================================
//
// A pending mutation is applied to the cached records before the backend
// call and keeps what is needed to undo it. On backend success it is
// dropped; on failure `rollback` restores the pre-mutation state.
//
// ============================================================================

use crate::core::{RawRow, Result};
use crate::store::Entity;
use im::Vector;

/// A local change awaiting backend confirmation
#[derive(Debug, Clone)]
pub enum PendingMutation<E> {
    /// Provisional record inserted ahead of the server row
    Insert { record: E },

    /// Record replaced by its patched version
    Update { id: String, before: E },

    /// Record removed from `index`
    Remove { index: usize, before: E },
}

pub(crate) fn position<E: Entity>(records: &Vector<E>, id: &str) -> Option<usize> {
    records.iter().position(|record| record.id() == id)
}

impl<E: Entity> PendingMutation<E> {
    /// Insert `record` at the front of `records`.
    pub fn begin_insert(records: &mut Vector<E>, record: E) -> Self {
        records.push_front(record.clone());
        PendingMutation::Insert { record }
    }

    /// Apply `patch` to the record with `id`. `Ok(None)` when the record
    /// is not cached.
    pub fn begin_update(records: &mut Vector<E>, id: &str, patch: &RawRow) -> Result<Option<Self>> {
        let Some(index) = position(records, id) else {
            return Ok(None);
        };

        let before = records[index].clone();
        let after = before.apply_patch(patch)?;
        records.set(index, after);

        Ok(Some(PendingMutation::Update {
            id: id.to_string(),
            before,
        }))
    }

    /// Remove the record with `id`, if cached.
    pub fn begin_remove(records: &mut Vector<E>, id: &str) -> Option<Self> {
        let index = position(records, id)?;
        let before = records.remove(index);
        Some(PendingMutation::Remove { index, before })
    }

    pub fn record_id(&self) -> &str {
        match self {
            PendingMutation::Insert { record } => record.id(),
            PendingMutation::Update { id, .. } => id,
            PendingMutation::Remove { before, .. } => before.id(),
        }
    }

    /// Undo the mutation. Returns whether `records` changed.
    ///
    /// A record removed by someone else while the update was pending stays
    /// removed, and a removed record that reappeared meanwhile is not
    /// inserted twice.
    pub fn rollback(self, records: &mut Vector<E>) -> bool {
        match self {
            PendingMutation::Insert { record } => match position(records, record.id()) {
                Some(index) => {
                    records.remove(index);
                    true
                }
                None => false,
            },
            PendingMutation::Update { id, before } => match position(records, &id) {
                Some(index) => {
                    records.set(index, before);
                    true
                }
                None => false,
            },
            PendingMutation::Remove { index, before } => {
                if position(records, before.id()).is_some() {
                    return false;
                }
                let index = index.min(records.len());
                records.insert(index, before);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DailyNote;
    use chrono::NaiveDate;
    use serde_json::json;

    fn note(id: &str, body: &str) -> DailyNote {
        DailyNote {
            id: id.to_string(),
            note_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            service: "meals".to_string(),
            body: body.to_string(),
            created_by: None,
        }
    }

    fn patch(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_rollback_restores_snapshot() {
        let mut records = Vector::from(vec![note("a", "old"), note("b", "keep")]);
        let txn = PendingMutation::begin_update(&mut records, "a", &patch(json!({"body": "new"})))
            .unwrap()
            .unwrap();
        assert_eq!(records[0].body, "new");

        assert!(txn.rollback(&mut records));
        assert_eq!(records[0].body, "old");
        assert_eq!(records[1].body, "keep");
    }

    #[test]
    fn test_update_missing_record() {
        let mut records = Vector::from(vec![note("a", "old")]);
        let txn = PendingMutation::begin_update(&mut records, "zz", &patch(json!({"body": "x"})));
        assert!(txn.unwrap().is_none());
    }

    #[test]
    fn test_update_rollback_after_concurrent_remove_is_noop() {
        let mut records = Vector::from(vec![note("a", "old")]);
        let txn = PendingMutation::begin_update(&mut records, "a", &patch(json!({"body": "new"})))
            .unwrap()
            .unwrap();
        records.remove(0);

        assert!(!txn.rollback(&mut records));
        assert!(records.is_empty());
    }

    #[test]
    fn test_remove_rollback_restores_position() {
        let mut records = Vector::from(vec![note("a", "1"), note("b", "2"), note("c", "3")]);
        let txn = PendingMutation::begin_remove(&mut records, "b").unwrap();
        assert_eq!(txn.record_id(), "b");
        assert_eq!(records.len(), 2);

        assert!(txn.rollback(&mut records));
        let ids: Vec<_> = records.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_rollback_only_removes_provisional() {
        let mut records = Vector::from(vec![note("a", "1")]);
        let txn = PendingMutation::begin_insert(&mut records, note("local-1", "tmp"));
        assert_eq!(records.len(), 2);

        assert!(txn.rollback(&mut records));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }
}
