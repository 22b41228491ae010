//! Connection bootstrap for the two physical stores.
//!
//! # Responsibility
//! - Open the private store as the connection's `main` schema.
//! - Attach the shared store as schema `shared`.
//! - Migrate each store before it becomes visible to callers.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - A store is attached only after its own migrations succeeded.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::model::scope::Scope;
use log::{error, info};
use rusqlite::Connection;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Where one physical store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::InMemory => "memory",
        }
    }

    fn attach_target(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::InMemory => ":memory:".to_string(),
        }
    }
}

impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::InMemory => f.write_str(":memory:"),
        }
    }
}

/// Opens the private store and applies its pending migrations.
///
/// # Side effects
/// - Emits `store_open` logging events with duration and status.
pub fn open_primary_store(location: &StoreLocation) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!(
        "event=store_open module=db status=start scope=private mode={}",
        location.mode()
    );

    let opened = match location {
        StoreLocation::File(path) => Connection::open(path),
        StoreLocation::InMemory => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=store_open module=db status=error scope=private mode={} duration_ms={} error_code=store_open_failed error={}",
                location.mode(),
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    let bootstrapped = bootstrap_primary(&mut conn);
    log_bootstrap(Scope::Private, location, started_at, &bootstrapped);
    bootstrapped.map(|_| conn)
}

/// Attaches the shared store onto an open primary connection and migrates it.
pub fn attach_store(conn: &mut Connection, location: &StoreLocation) -> DbResult<()> {
    let started_at = Instant::now();
    info!(
        "event=store_open module=db status=start scope=shared mode={}",
        location.mode()
    );

    let attached = attach_and_migrate(conn, location);
    log_bootstrap(Scope::Shared, location, started_at, &attached);
    attached
}

fn bootstrap_primary(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn, Scope::Private)
}

fn attach_and_migrate(conn: &mut Connection, location: &StoreLocation) -> DbResult<()> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {};", Scope::Shared.schema()),
        [location.attach_target()],
    )?;
    apply_migrations(conn, Scope::Shared)
}

fn log_bootstrap(
    scope: Scope,
    location: &StoreLocation,
    started_at: Instant,
    outcome: &DbResult<()>,
) {
    match outcome {
        Ok(()) => info!(
            "event=store_open module=db status=ok scope={} mode={} duration_ms={}",
            scope,
            location.mode(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=store_open module=db status=error scope={} mode={} duration_ms={} error_code=store_bootstrap_failed error={}",
            scope,
            location.mode(),
            started_at.elapsed().as_millis(),
            err
        ),
    }
}
