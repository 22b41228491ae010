//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open the private store file and attach the shared store file onto one
//!   connection, so one local transaction spans both physical stores.
//! - Apply schema migrations to each physical store independently.
//!
//! # Invariants
//! - Migration version is tracked per store via `PRAGMA <schema>.user_version`.
//! - Core code must not read/write entity data before both stores migrated.

use crate::model::scope::Scope;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{attach_store, open_primary_store, StoreLocation};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        scope: Scope,
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                scope,
                db_version,
                latest_supported,
            } => write!(
                f,
                "{scope} store schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
