//! Domain model for packing-list aggregates and sharing grants.
//!
//! # Responsibility
//! - Define the persisted entity shape used by both physical stores.
//! - Define scope routing and share grant records.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId`.
//! - Every entity belongs to exactly one aggregate, identified by its root.

pub mod entity;
pub mod scope;
pub mod share;
