//! Per-property trump merge policy.
//!
//! # Responsibility
//! - Reconcile an incoming copy of an entity with the local copy, one field at
//!   a time.
//!
//! # Invariants
//! - For every field the value with the highest `StampedValue::precedence`
//!   wins; fields absent from the incoming copy keep their local value.
//! - Merging is idempotent and commutative, so arrival order of remote
//!   changes does not affect the final state.
//! - Same-field concurrent edits resolve by last-writer-wins; the losing value
//!   is discarded.

use crate::model::entity::{Entity, StampedValue};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Result of merging one incoming entity copy.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: Entity,
    /// Fields whose value was taken from the incoming copy.
    pub changed_fields: Vec<String>,
    /// `true` when no local copy existed.
    pub inserted: bool,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        !self.inserted && self.changed_fields.is_empty()
    }
}

/// Merges `incoming` field maps into `local`, returning the names of fields
/// the incoming side won.
pub fn merge_fields(
    local: &mut BTreeMap<String, StampedValue>,
    incoming: &BTreeMap<String, StampedValue>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, candidate) in incoming {
        let wins = match local.get(name) {
            Some(current) => candidate.precedence(current) == Ordering::Greater,
            None => true,
        };
        if wins {
            local.insert(name.clone(), candidate.clone());
            changed.push(name.clone());
        }
    }
    changed
}

/// Merges an incoming entity copy into an optional local copy.
///
/// Structural attributes (`kind`, `parent`, `root`) are immutable after
/// creation, so the local copy's structure is kept when one exists.
pub fn merge_entity(local: Option<&Entity>, incoming: &Entity) -> MergeOutcome {
    match local {
        None => MergeOutcome {
            merged: incoming.clone(),
            changed_fields: incoming.fields.keys().cloned().collect(),
            inserted: true,
        },
        Some(local) => {
            let mut merged = local.clone();
            let changed_fields = merge_fields(&mut merged.fields, &incoming.fields);
            MergeOutcome {
                merged,
                changed_fields,
                inserted: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_entity, merge_fields};
    use crate::model::entity::{Entity, EntityKind, FieldStamp, FieldValue, StampedValue};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn stamped(value: &str, time: u64, device: u128) -> StampedValue {
        StampedValue::new(
            FieldValue::from(value),
            FieldStamp::new(time, Uuid::from_u128(device)),
        )
    }

    #[test]
    fn newer_field_wins_and_untouched_fields_are_kept() {
        let mut local = BTreeMap::from([
            ("title".to_string(), stamped("Trip", 10, 1)),
            ("notes".to_string(), stamped("bring map", 10, 1)),
        ]);
        let incoming = BTreeMap::from([("title".to_string(), stamped("Yosemite Trip", 20, 2))]);

        let changed = merge_fields(&mut local, &incoming);
        assert_eq!(changed, vec!["title".to_string()]);
        assert_eq!(local["title"].value, FieldValue::from("Yosemite Trip"));
        assert_eq!(local["notes"].value, FieldValue::from("bring map"));
    }

    #[test]
    fn older_incoming_field_is_ignored() {
        let mut local = BTreeMap::from([("title".to_string(), stamped("Local", 30, 1))]);
        let incoming = BTreeMap::from([("title".to_string(), stamped("Remote", 20, 2))]);

        assert!(merge_fields(&mut local, &incoming).is_empty());
        assert_eq!(local["title"].value, FieldValue::from("Local"));
    }

    #[test]
    fn equal_timestamps_break_ties_by_device() {
        let mut local = BTreeMap::from([("title".to_string(), stamped("from-1", 10, 1))]);
        let incoming = BTreeMap::from([("title".to_string(), stamped("from-2", 10, 2))]);

        merge_fields(&mut local, &incoming);
        assert_eq!(local["title"].value, FieldValue::from("from-2"));
    }

    #[test]
    fn merge_entity_keeps_local_structure() {
        let list = Entity::new_root(EntityKind::PackingList);
        let mut local = Entity::new_child(EntityKind::Item, &list);
        local.set("name", "tent", FieldStamp::new(1, Uuid::from_u128(1)));

        let mut incoming = local.clone();
        incoming.parent = None;
        incoming.set("name", "two-person tent", FieldStamp::new(2, Uuid::from_u128(2)));

        let outcome = merge_entity(Some(&local), &incoming);
        assert!(!outcome.inserted);
        assert_eq!(outcome.merged.parent, Some(list.id));
        assert_eq!(outcome.merged.text("name"), Some("two-person tent"));

        let fresh = merge_entity(None, &incoming);
        assert!(fresh.inserted);
        assert!(!fresh.is_noop());
    }
}
