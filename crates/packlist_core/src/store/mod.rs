//! Local object store and dual remote-backed store manager.
//!
//! # Responsibility
//! - Hold the single process-wide transactional context over both physical
//!   stores.
//! - Route every aggregate to the store of its current scope and mirror each
//!   store to the matching remote scope.
//!
//! # Invariants
//! - An aggregate lives entirely in one physical store.
//! - Entity data is never read or written before both stores loaded.

use crate::db::DbError;
use crate::model::entity::EntityId;
use crate::model::scope::Scope;
use crate::remote::RemoteError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity_repo;
mod manager;
mod transaction;

pub use entity_repo::{PendingChange, PendingOp};
pub use manager::{
    configure_stores, DualStoreManager, ExportReport, ImportReport, SaveReport, StoreDescription,
};
pub use transaction::{StagedChange, Transaction};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reading or writing one physical store.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Either physical store failed to open; the persistence layer is unusable.
#[derive(Debug)]
pub enum StoreLoadError {
    /// Store descriptions do not cover exactly one private and one shared store.
    Misconfigured(String),
    /// Opening, attaching or migrating one store failed.
    Open { scope: Scope, source: DbError },
    /// Stores opened but the scope index could not be built.
    Index(StoreError),
}

impl Display for StoreLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Misconfigured(message) => write!(f, "store configuration invalid: {message}"),
            Self::Open { scope, source } => write!(f, "failed to load {scope} store: {source}"),
            Self::Index(err) => write!(f, "failed to index loaded stores: {err}"),
        }
    }
}

impl Error for StoreLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Misconfigured(_) => None,
            Self::Open { source, .. } => Some(source),
            Self::Index(err) => Some(err),
        }
    }
}

/// Local commit failure. The stores are left unchanged.
#[derive(Debug)]
pub enum SaveError {
    /// A staged change violates an entity invariant.
    Validation(String),
    /// A staged change targets an entity that does not exist.
    EntityNotFound(EntityId),
    /// Commit failed in storage.
    Store(StoreError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "save rejected: {message}"),
            Self::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SaveError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for SaveError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.into())
    }
}

/// Failure of one export or import batch.
#[derive(Debug)]
pub enum SyncError {
    Remote(RemoteError),
    Store(StoreError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.into())
    }
}
