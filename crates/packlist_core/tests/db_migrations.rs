use packlist_core::db::migrations::{current_user_version, latest_version};
use packlist_core::db::{attach_store, open_primary_store, DbError, StoreLocation};
use packlist_core::store::{DualStoreManager, StoreDescription, StoreLoadError};
use packlist_core::Scope;
use rusqlite::Connection;
use uuid::Uuid;

fn descriptions(private: StoreLocation, shared: StoreLocation) -> (StoreDescription, StoreDescription) {
    (
        StoreDescription {
            scope: Scope::Private,
            location: private,
        },
        StoreDescription {
            scope: Scope::Shared,
            location: shared,
        },
    )
}

#[test]
fn both_stores_are_migrated_on_one_connection() {
    let mut conn = open_primary_store(&StoreLocation::InMemory).expect("open private store");
    attach_store(&mut conn, &StoreLocation::InMemory).expect("attach shared store");

    for scope in Scope::ALL {
        assert_eq!(
            current_user_version(&conn, scope).expect("read version"),
            latest_version()
        );
    }
    for table in ["entities", "entity_fields", "pending_changes", "sync_state"] {
        assert_table_exists(&conn, "main", table);
        assert_table_exists(&conn, "shared", table);
    }
}

#[test]
fn reopening_store_files_is_idempotent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let private = StoreLocation::File(dir.path().join("private.sqlite3"));
    let shared = StoreLocation::File(dir.path().join("shared.sqlite3"));

    for _ in 0..2 {
        let mut conn = open_primary_store(&private).expect("open private store");
        attach_store(&mut conn, &shared).expect("attach shared store");
        assert_eq!(
            current_user_version(&conn, Scope::Shared).expect("read version"),
            latest_version()
        );
    }
    assert!(dir.path().join("private.sqlite3").exists());
    assert!(dir.path().join("shared.sqlite3").exists());
}

#[test]
fn newer_shared_schema_fails_loading_and_names_the_scope() {
    let dir = tempfile::tempdir().expect("temp dir");
    let shared_path = dir.path().join("shared.sqlite3");
    let conn = Connection::open(&shared_path).expect("create shared file");
    conn.execute_batch("PRAGMA user_version = 999;")
        .expect("bump schema version");
    drop(conn);

    let (private, shared) = descriptions(
        StoreLocation::File(dir.path().join("private.sqlite3")),
        StoreLocation::File(shared_path),
    );
    let err = DualStoreManager::load(private, shared, Uuid::new_v4())
        .err()
        .expect("newer schema must fail loading");
    match err {
        StoreLoadError::Open {
            scope: Scope::Shared,
            source:
                DbError::UnsupportedSchemaVersion {
                    scope,
                    db_version,
                    latest_supported,
                },
        } => {
            assert_eq!(scope, Scope::Shared);
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unopenable_private_store_is_fatal() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (private, shared) = descriptions(
        StoreLocation::File(dir.path().to_path_buf()),
        StoreLocation::InMemory,
    );
    let err = DualStoreManager::load(private, shared, Uuid::new_v4())
        .err()
        .expect("a directory is not a store file");
    assert!(matches!(
        err,
        StoreLoadError::Open {
            scope: Scope::Private,
            ..
        }
    ));
}

#[test]
fn one_file_for_both_stores_is_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("stores.sqlite3");
    let (private, shared) = descriptions(
        StoreLocation::File(path.clone()),
        StoreLocation::File(path),
    );
    let err = DualStoreManager::load(private, shared, Uuid::new_v4())
        .err()
        .expect("shared file must be rejected");
    assert!(matches!(err, StoreLoadError::Misconfigured(_)));
}

fn assert_table_exists(conn: &Connection, schema: &str, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            &format!(
                "SELECT EXISTS(
                    SELECT 1 FROM {schema}.sqlite_master
                    WHERE type = 'table' AND name = ?1
                );"
            ),
            [table_name],
            |row| row.get(0),
        )
        .expect("query sqlite_master");
    assert_eq!(exists, 1, "table {schema}.{table_name} does not exist");
}
