//! Entity domain model.
//!
//! # Responsibility
//! - Define the canonical record for packing lists and everything they own.
//! - Carry per-field write stamps used by the merge policy.
//!
//! # Invariants
//! - `id` is stable and never reused for another entity.
//! - `root == id` iff the entity is an aggregate root (`parent == None`).
//! - Children always belong to the same aggregate as their parent.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uhlc::NTP64;
use uuid::Uuid;

/// Stable identifier for every persisted entity.
pub type EntityId = Uuid;

/// Stable identifier of one device replica; tie-breaker for equal stamps.
pub type DeviceId = Uuid;

/// Field that carries an aggregate root's human-readable name.
pub const TITLE_FIELD: &str = "title";

const UNTITLED: &str = "Untitled";

/// Persisted entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Aggregate root; the unit of sharing.
    PackingList,
    /// Grouping inside one packing list.
    Category,
    /// One thing to pack.
    Item,
    /// Departure reminder attached to a packing list.
    Reminder,
    /// Restock note attached to an item.
    RestockEntry,
}

impl EntityKind {
    /// Stable string id used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackingList => "packing_list",
            Self::Category => "category",
            Self::Item => "item",
            Self::Reminder => "reminder",
            Self::RestockEntry => "restock_entry",
        }
    }

    /// Parses the storage string id.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "packing_list" => Some(Self::PackingList),
            "category" => Some(Self::Category),
            "item" => Some(Self::Item),
            "reminder" => Some(Self::Reminder),
            "restock_entry" => Some(Self::RestockEntry),
            _ => None,
        }
    }

    /// Whether this kind starts an aggregate.
    pub fn is_aggregate_root(self) -> bool {
        matches!(self, Self::PackingList)
    }

    /// Whether an entity of this kind may be owned by `parent`.
    pub fn can_be_child_of(self, parent: EntityKind) -> bool {
        match self {
            Self::PackingList => false,
            Self::Category | Self::Reminder => parent == Self::PackingList,
            Self::Item => matches!(parent, Self::PackingList | Self::Category),
            Self::RestockEntry => parent == Self::Item,
        }
    }
}

/// Scalar value of one entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Canonical encoding used for storage and as the last-resort merge
    /// tie-breaker.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

/// Field-level write stamp: hybrid logical time plus writing device.
///
/// `time` is a raw `uhlc` NTP64 value (seconds since the Unix epoch in the
/// high 32 bits, fraction and logical counter in the low 32 bits).
/// Ordering is `(time, device)`, so two stamps from different devices never
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldStamp {
    pub time: u64,
    pub device: DeviceId,
}

impl FieldStamp {
    pub fn new(time: u64, device: DeviceId) -> Self {
        Self { time, device }
    }

    /// Wall-clock part of the stamp in Unix epoch milliseconds.
    pub fn epoch_ms(&self) -> i64 {
        i64::try_from(NTP64(self.time).to_duration().as_millis()).unwrap_or(i64::MAX)
    }

    /// SQLite has no unsigned integers; the time is stored bit-for-bit.
    pub(crate) fn sql_time(&self) -> i64 {
        self.time as i64
    }

    pub(crate) fn from_sql_time(raw: i64, device: DeviceId) -> Self {
        Self::new(raw as u64, device)
    }
}

/// One field value together with the stamp of the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedValue {
    pub value: FieldValue,
    pub stamp: FieldStamp,
}

impl StampedValue {
    pub fn new(value: FieldValue, stamp: FieldStamp) -> Self {
        Self { value, stamp }
    }

    /// Total precedence order used by the per-property trump rule.
    pub fn precedence(&self, other: &Self) -> Ordering {
        self.stamp
            .cmp(&other.stamp)
            .then_with(|| self.value.canonical_json().cmp(&other.value.canonical_json()))
    }
}

/// Canonical persisted record for every packing-list object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Owning entity. `None` only for aggregate roots.
    pub parent: Option<EntityId>,
    /// Aggregate root; equals `id` for roots.
    pub root: EntityId,
    pub fields: BTreeMap<String, StampedValue>,
}

impl Entity {
    /// Creates a new aggregate root with a generated stable ID.
    pub fn new_root(kind: EntityKind) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            kind,
            parent: None,
            root: id,
            fields: BTreeMap::new(),
        }
    }

    /// Creates a new child owned by `parent`, inheriting its aggregate.
    pub fn new_child(kind: EntityKind, parent: &Entity) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            parent: Some(parent.id),
            root: parent.root,
            fields: BTreeMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|stamped| &stamped.value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }

    /// Human-readable name used for share titles.
    pub fn display_name(&self) -> String {
        match self.text(TITLE_FIELD).map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => UNTITLED.to_string(),
        }
    }

    /// Sets one field with an explicit stamp.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>, stamp: FieldStamp) {
        self.fields
            .insert(name.into(), StampedValue::new(value.into(), stamp));
    }

    /// Checks structural invariants that storage relies on.
    pub fn validate(&self) -> Result<(), String> {
        match self.parent {
            None if self.root != self.id => Err(format!("root entity {} has foreign root", self.id)),
            None if !self.kind.is_aggregate_root() => Err(format!(
                "entity {} of kind `{}` requires a parent",
                self.id,
                self.kind.as_str()
            )),
            Some(_) if self.kind.is_aggregate_root() => Err(format!(
                "entity {} of kind `{}` cannot have a parent",
                self.id,
                self.kind.as_str()
            )),
            Some(parent) if parent == self.id => Err(format!("entity {} owns itself", self.id)),
            _ => {
                for name in self.fields.keys() {
                    if !is_valid_field_name(name) {
                        return Err(format!("invalid field name `{name}`"));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Field names are lowercase ascii identifiers.
pub fn is_valid_field_name(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
