use cellsync_core::db::migrations::latest_version;
use cellsync_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "people",
        "period_enrollments",
        "cell_groups",
        "cell_memberships",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellsync.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute(
            "INSERT INTO people (person_id, display_name) VALUES (1, 'Alice');",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let people: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM people;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(people, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn upgrading_version_one_marks_existing_names_explicit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v1.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0001_init.sql"))
        .unwrap();
    conn.execute_batch(
        "PRAGMA user_version = 1;
         INSERT INTO cell_groups (group_id, name, period_year) VALUES (10, 'Cell', 2024);",
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    let is_explicit: i64 = conn
        .query_row(
            "SELECT name_is_explicit FROM cell_groups WHERE group_id = 10;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(is_explicit, 1);
}

#[test]
fn leader_slot_is_unique_per_group() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO people (person_id, display_name) VALUES (1, 'A'), (2, 'B');
         INSERT INTO cell_groups (group_id, name, period_year) VALUES (10, 'Cell', 2024);
         INSERT INTO cell_memberships (period_year, person_id, group_id, role)
         VALUES (2024, 1, 10, 'leader');",
    )
    .unwrap();

    let err = conn
        .execute(
            "INSERT INTO cell_memberships (period_year, person_id, group_id, role)
             VALUES (2024, 2, 10, 'leader');",
            [],
        )
        .map_err(DbError::from)
        .unwrap_err();
    assert!(err.is_constraint_violation());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
