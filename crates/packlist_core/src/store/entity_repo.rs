//! Entity persistence inside one attached physical store.
//!
//! # Responsibility
//! - Keep SQL for entities, fields, outbox and sync state in one place.
//! - Address every statement to the schema of the store it targets.
//!
//! # Invariants
//! - Read paths reject invalid persisted state instead of masking it.
//! - Aggregate listings are parent-first, so they can be re-inserted in order.

use crate::model::entity::{
    Entity, EntityId, EntityKind, FieldStamp, FieldValue, StampedValue,
};
use crate::model::scope::Scope;
use crate::store::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outbox operation for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Upsert,
    Delete,
}

impl PendingOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One queued, not yet pushed, local change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub entity_id: EntityId,
    pub root: EntityId,
    pub op: PendingOp,
}

/// Schema-scoped repository over one physical store.
pub struct EntityRepo<'conn> {
    conn: &'conn Connection,
    schema: &'static str,
}

impl<'conn> EntityRepo<'conn> {
    pub fn new(conn: &'conn Connection, scope: Scope) -> Self {
        Self {
            conn,
            schema: scope.schema(),
        }
    }

    pub fn get(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, kind, root_id, parent_id FROM {}.entities WHERE id = ?1;",
                    self.schema
                ),
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(self.hydrate(raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: EntityId) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {}.entities WHERE id = ?1);",
                self.schema
            ),
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Root and kind of one entity, if stored here.
    pub fn locate(&self, id: EntityId) -> StoreResult<Option<(EntityId, EntityKind)>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT root_id, kind FROM {}.entities WHERE id = ?1;",
                    self.schema
                ),
                [id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((root, kind)) => Ok(Some((parse_id(&root, "root_id")?, parse_kind(&kind)?))),
            None => Ok(None),
        }
    }

    /// Inserts a structural row plus all of its fields.
    pub fn insert(&self, entity: &Entity) -> StoreResult<()> {
        entity.validate().map_err(StoreError::InvalidData)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {}.entities (id, kind, root_id, parent_id) VALUES (?1, ?2, ?3, ?4);",
                self.schema
            ),
            params![
                entity.id.to_string(),
                entity.kind.as_str(),
                entity.root.to_string(),
                entity.parent.map(|parent| parent.to_string()),
            ],
        )?;
        for (name, stamped) in &entity.fields {
            self.write_field(entity.id, name, stamped)?;
        }
        Ok(())
    }

    /// Replaces one field value and its stamp.
    pub fn write_field(&self, id: EntityId, name: &str, stamped: &StampedValue) -> StoreResult<()> {
        let value_json = serde_json::to_string(&stamped.value)
            .map_err(|err| StoreError::InvalidData(format!("field `{name}`: {err}")))?;
        self.conn.execute(
            &format!(
                "INSERT INTO {}.entity_fields (entity_id, field, value_json, stamp_time, stamp_device)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (entity_id, field) DO UPDATE SET
                    value_json = excluded.value_json,
                    stamp_time = excluded.stamp_time,
                    stamp_device = excluded.stamp_device;",
                self.schema
            ),
            params![
                id.to_string(),
                name,
                value_json,
                stamped.stamp.sql_time(),
                stamped.stamp.device.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Deletes one entity; owned children and fields cascade.
    pub fn delete(&self, id: EntityId) -> StoreResult<bool> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {}.entities WHERE id = ?1;", self.schema),
            [id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Ids of `id` and everything it transitively owns, parent-first.
    pub fn subtree_ids(&self, id: EntityId) -> StoreResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(&format!(
            "WITH RECURSIVE tree(id, depth) AS (
                SELECT id, 0 FROM {schema}.entities WHERE id = ?1
                UNION ALL
                SELECT child.id, tree.depth + 1
                FROM {schema}.entities AS child
                JOIN tree ON child.parent_id = tree.id
             )
             SELECT tree.id
             FROM tree JOIN {schema}.entities AS e ON e.id = tree.id
             ORDER BY tree.depth ASC, e.created_at ASC, e.id ASC;",
            schema = self.schema
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_id(&text, "id")?);
        }
        Ok(ids)
    }

    /// Every entity of one aggregate, parent-first.
    pub fn aggregate(&self, root: EntityId) -> StoreResult<Vec<Entity>> {
        let mut entities = Vec::new();
        for id in self.subtree_ids(root)? {
            if let Some(entity) = self.get(id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Direct children of one entity.
    pub fn children(&self, parent: EntityId) -> StoreResult<Vec<Entity>> {
        let ids = self.ids_where("parent_id = ?1", Some(parent))?;
        self.load_all(ids)
    }

    /// Aggregate root ids stored here.
    pub fn root_ids(&self) -> StoreResult<Vec<EntityId>> {
        self.ids_where("parent_id IS NULL", None)
    }

    pub fn roots(&self) -> StoreResult<Vec<Entity>> {
        let ids = self.root_ids()?;
        self.load_all(ids)
    }

    pub fn queue_change(&self, entity_id: EntityId, root: EntityId, op: PendingOp, queued_at_ms: i64) -> StoreResult<()> {
        // A queued delete is final for that entity.
        self.conn.execute(
            &format!(
                "INSERT INTO {}.pending_changes (entity_id, root_id, op, queued_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (entity_id) DO UPDATE SET
                    op = CASE WHEN op = 'delete' THEN 'delete' ELSE excluded.op END,
                    queued_at = excluded.queued_at;",
                self.schema
            ),
            params![entity_id.to_string(), root.to_string(), op.as_str(), queued_at_ms],
        )?;
        Ok(())
    }

    pub fn pending_op(&self, entity_id: EntityId) -> StoreResult<Option<PendingOp>> {
        let op = self
            .conn
            .query_row(
                &format!(
                    "SELECT op FROM {}.pending_changes WHERE entity_id = ?1;",
                    self.schema
                ),
                [entity_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match op {
            Some(value) => Ok(Some(parse_op(&value)?)),
            None => Ok(None),
        }
    }

    /// Queued changes in queue order.
    pub fn pending_changes(&self) -> StoreResult<Vec<PendingChange>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT entity_id, root_id, op FROM {}.pending_changes
             ORDER BY queued_at ASC, entity_id ASC;",
            self.schema
        ))?;
        let mut rows = stmt.query([])?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            let entity_id: String = row.get(0)?;
            let root: String = row.get(1)?;
            let op: String = row.get(2)?;
            changes.push(PendingChange {
                entity_id: parse_id(&entity_id, "pending_changes.entity_id")?,
                root: parse_id(&root, "pending_changes.root_id")?,
                op: parse_op(&op)?,
            });
        }
        Ok(changes)
    }

    pub fn clear_pending(&self, entity_id: EntityId) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "DELETE FROM {}.pending_changes WHERE entity_id = ?1;",
                self.schema
            ),
            [entity_id.to_string()],
        )?;
        Ok(())
    }

    pub fn clear_pending_for_root(&self, root: EntityId) -> StoreResult<usize> {
        let cleared = self.conn.execute(
            &format!(
                "DELETE FROM {}.pending_changes WHERE root_id = ?1;",
                self.schema
            ),
            [root.to_string()],
        )?;
        Ok(cleared)
    }

    pub fn state(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {}.sync_state WHERE key = ?1;", self.schema),
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {}.sync_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value;",
                self.schema
            ),
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_state(&self, key: &str) -> StoreResult<bool> {
        let cleared = self.conn.execute(
            &format!("DELETE FROM {}.sync_state WHERE key = ?1;", self.schema),
            [key],
        )?;
        Ok(cleared > 0)
    }

    fn ids_where(&self, predicate: &str, bind: Option<EntityId>) -> StoreResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {}.entities WHERE {predicate} ORDER BY created_at ASC, id ASC;",
            self.schema
        ))?;
        let mut rows = match bind {
            Some(id) => stmt.query([id.to_string()])?,
            None => stmt.query([])?,
        };
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_id(&text, "id")?);
        }
        Ok(ids)
    }

    fn load_all(&self, ids: Vec<EntityId>) -> StoreResult<Vec<Entity>> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.get(id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    fn hydrate(&self, raw: (String, String, String, Option<String>)) -> StoreResult<Entity> {
        let (id_text, kind_text, root_text, parent_text) = raw;
        let id = parse_id(&id_text, "entities.id")?;
        let parent = match parent_text {
            Some(value) => Some(parse_id(&value, "entities.parent_id")?),
            None => None,
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT field, value_json, stamp_time, stamp_device
             FROM {}.entity_fields WHERE entity_id = ?1;",
            self.schema
        ))?;
        let mut rows = stmt.query([id_text.as_str()])?;
        let mut fields = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let value_json: String = row.get(1)?;
            let value: FieldValue = serde_json::from_str(&value_json).map_err(|err| {
                StoreError::InvalidData(format!(
                    "invalid value for field `{name}` of entity {id}: {err}"
                ))
            })?;
            let device: String = row.get(3)?;
            let stamp = FieldStamp::from_sql_time(row.get(2)?, parse_id(&device, "entity_fields.stamp_device")?);
            fields.insert(name, StampedValue::new(value, stamp));
        }

        let entity = Entity {
            id,
            kind: parse_kind(&kind_text)?,
            parent,
            root: parse_id(&root_text, "entities.root_id")?,
            fields,
        };
        entity.validate().map_err(StoreError::InvalidData)?;
        Ok(entity)
    }
}

/// Moves one aggregate (rows, fields and outbox entries) between stores.
///
/// Must run inside a transaction; foreign keys are deferred to commit so
/// rows can be copied regardless of order.
pub fn move_aggregate(conn: &Connection, root: EntityId, from: Scope, to: Scope) -> StoreResult<usize> {
    let (src, dst) = (from.schema(), to.schema());
    let root_text = root.to_string();
    conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
    let moved = conn.execute(
        &format!(
            "INSERT INTO {dst}.entities (id, kind, root_id, parent_id, created_at)
             SELECT id, kind, root_id, parent_id, created_at FROM {src}.entities WHERE root_id = ?1;"
        ),
        [root_text.as_str()],
    )?;
    conn.execute(
        &format!(
            "INSERT INTO {dst}.entity_fields (entity_id, field, value_json, stamp_time, stamp_device)
             SELECT f.entity_id, f.field, f.value_json, f.stamp_time, f.stamp_device
             FROM {src}.entity_fields AS f
             JOIN {src}.entities AS e ON e.id = f.entity_id
             WHERE e.root_id = ?1;"
        ),
        [root_text.as_str()],
    )?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {dst}.pending_changes (entity_id, root_id, op, queued_at)
             SELECT entity_id, root_id, op, queued_at FROM {src}.pending_changes WHERE root_id = ?1;"
        ),
        [root_text.as_str()],
    )?;
    conn.execute(
        &format!("DELETE FROM {src}.pending_changes WHERE root_id = ?1;"),
        [root_text.as_str()],
    )?;
    conn.execute(
        &format!("DELETE FROM {src}.entities WHERE id = ?1;"),
        [root_text.as_str()],
    )?;
    Ok(moved)
}

fn parse_id(value: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_kind(value: &str) -> StoreResult<EntityKind> {
    EntityKind::parse(value)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid entity kind `{value}`")))
}

fn parse_op(value: &str) -> StoreResult<PendingOp> {
    PendingOp::parse(value)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid pending op `{value}`")))
}
