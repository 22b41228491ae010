//! Staged local edits committed by `DualStoreManager::save`.

use crate::model::entity::{EntityId, EntityKind, FieldValue};
use uuid::Uuid;

/// One staged mutation, applied in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    InsertRoot {
        id: EntityId,
        kind: EntityKind,
        fields: Vec<(String, FieldValue)>,
    },
    InsertChild {
        id: EntityId,
        parent: EntityId,
        kind: EntityKind,
        fields: Vec<(String, FieldValue)>,
    },
    SetField {
        id: EntityId,
        field: String,
        value: FieldValue,
    },
    Delete {
        id: EntityId,
    },
}

/// Unit of local work. Nothing touches the stores until it is saved.
///
/// Identifiers of inserted entities are assigned at staging time so callers
/// can reference new parents within the same transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    changes: Vec<StagedChange>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a new aggregate root. New aggregates start in private scope.
    pub fn insert_root<K, V>(
        &mut self,
        kind: EntityKind,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> EntityId
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let id = Uuid::new_v4();
        self.changes.push(StagedChange::InsertRoot {
            id,
            kind,
            fields: collect_fields(fields),
        });
        id
    }

    /// Stages a new entity owned by `parent`.
    pub fn insert_child<K, V>(
        &mut self,
        parent: EntityId,
        kind: EntityKind,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> EntityId
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let id = Uuid::new_v4();
        self.changes.push(StagedChange::InsertChild {
            id,
            parent,
            kind,
            fields: collect_fields(fields),
        });
        id
    }

    pub fn set_field(
        &mut self,
        id: EntityId,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) {
        self.changes.push(StagedChange::SetField {
            id,
            field: field.into(),
            value: value.into(),
        });
    }

    /// Stages deletion of `id` and, by cascade, everything it owns.
    pub fn delete(&mut self, id: EntityId) {
        self.changes.push(StagedChange::Delete { id });
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn into_changes(self) -> Vec<StagedChange> {
        self.changes
    }
}

fn collect_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Vec<(String, FieldValue)>
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fields
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}
