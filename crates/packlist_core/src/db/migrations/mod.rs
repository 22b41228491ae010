//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations atomically to one attached store.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Migration SQL names every object as `{schema}.<name>`; the placeholder is
//!   substituted with the store's schema before execution.

use crate::db::{DbError, DbResult};
use crate::model::scope::Scope;
use rusqlite::Connection;

const SCHEMA_PLACEHOLDER: &str = "{schema}";

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_entities.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_sync_outbox.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations to the store attached for `scope`.
pub fn apply_migrations(conn: &mut Connection, scope: Scope) -> DbResult<()> {
    let schema = scope.schema();
    let current_version = current_user_version(conn, scope)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            scope,
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(&migration.sql.replace(SCHEMA_PLACEHOLDER, schema))?;
        tx.execute_batch(&format!(
            "PRAGMA {schema}.user_version = {};",
            migration.version
        ))?;
    }
    tx.commit()?;

    Ok(())
}

/// Reads the schema version of one attached store.
pub fn current_user_version(conn: &Connection, scope: Scope) -> DbResult<u32> {
    let version = conn.query_row(
        &format!("PRAGMA {}.user_version;", scope.schema()),
        [],
        |row| row.get::<_, u32>(0),
    )?;
    Ok(version)
}
