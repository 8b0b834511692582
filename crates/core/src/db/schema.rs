//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id          TEXT    NOT NULL UNIQUE,
            building_id         TEXT    NOT NULL,
            floor_id            TEXT    NOT NULL,
            branch_name         TEXT    NOT NULL,
            parent_version_id   TEXT,
            version_type        TEXT    NOT NULL CHECK (version_type IN ('major', 'minor', 'patch', 'branch')),
            version_number      TEXT    NOT NULL,
            branch_seq          INTEGER NOT NULL,
            commit_message      TEXT    NOT NULL DEFAULT '',
            author              TEXT    NOT NULL DEFAULT '',
            created_at          TEXT    NOT NULL,
            content_hash        TEXT    NOT NULL,
            content_size        INTEGER NOT NULL,
            metadata            TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (building_id, floor_id, branch_name, branch_seq)
        );

        CREATE INDEX IF NOT EXISTS idx_versions_document ON versions (building_id, floor_id);
        CREATE INDEX IF NOT EXISTS idx_versions_branch ON versions (building_id, floor_id, branch_name);
        CREATE INDEX IF NOT EXISTS idx_versions_parent ON versions (parent_version_id);

        CREATE TABLE IF NOT EXISTS branches (
            branch_name         TEXT NOT NULL,
            building_id         TEXT NOT NULL,
            floor_id            TEXT NOT NULL,
            base_version_id     TEXT NOT NULL REFERENCES versions (version_id),
            current_version_id  TEXT NOT NULL REFERENCES versions (version_id),
            status              TEXT NOT NULL DEFAULT 'active',
            created_by          TEXT NOT NULL DEFAULT '',
            created_at          TEXT NOT NULL,
            last_updated        TEXT NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (branch_name, building_id, floor_id)
        );

        CREATE INDEX IF NOT EXISTS idx_branches_document ON branches (building_id, floor_id);

        CREATE TABLE IF NOT EXISTS merge_requests (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            merge_id            TEXT NOT NULL UNIQUE,
            source_branch       TEXT NOT NULL,
            target_branch       TEXT NOT NULL,
            building_id         TEXT NOT NULL,
            floor_id            TEXT NOT NULL,
            status              TEXT NOT NULL,
            resolution_strategy TEXT NOT NULL,
            source_version_id   TEXT NOT NULL REFERENCES versions (version_id),
            target_version_id   TEXT NOT NULL REFERENCES versions (version_id),
            base_version_id     TEXT REFERENCES versions (version_id),
            result_version_id   TEXT REFERENCES versions (version_id),
            created_by          TEXT NOT NULL DEFAULT '',
            created_at          TEXT NOT NULL,
            merged_by           TEXT,
            merged_at           TEXT,
            description         TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_merge_requests_document ON merge_requests (building_id, floor_id);
        CREATE INDEX IF NOT EXISTS idx_merge_requests_status ON merge_requests (status);

        CREATE TABLE IF NOT EXISTS conflicts (
            conflict_id     TEXT PRIMARY KEY,
            merge_id        TEXT NOT NULL REFERENCES merge_requests (merge_id),
            conflict_type   TEXT NOT NULL,
            object_id       TEXT NOT NULL,
            property_name   TEXT,
            source_value    TEXT,
            target_value    TEXT,
            resolution      TEXT,
            resolved_by     TEXT,
            resolved_at     TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_merge ON conflicts (merge_id);

        CREATE TABLE IF NOT EXISTS annotations (
            annotation_id   TEXT PRIMARY KEY,
            version_id      TEXT NOT NULL,
            building_id     TEXT NOT NULL,
            floor_id        TEXT NOT NULL,
            object_id       TEXT,
            position_x      REAL,
            position_y      REAL,
            annotation_type TEXT NOT NULL DEFAULT 'note',
            title           TEXT NOT NULL DEFAULT '',
            content         TEXT NOT NULL DEFAULT '',
            author          TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_annotations_version ON annotations (version_id);
        CREATE INDEX IF NOT EXISTS idx_annotations_document ON annotations (building_id, floor_id);

        CREATE TABLE IF NOT EXISTS comments (
            comment_id  TEXT PRIMARY KEY,
            parent_id   TEXT NOT NULL,
            parent_type TEXT NOT NULL CHECK (parent_type IN ('version', 'annotation')),
            author      TEXT NOT NULL DEFAULT '',
            content     TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments (parent_id, parent_type);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in [
            "versions",
            "branches",
            "merge_requests",
            "conflicts",
            "annotations",
            "comments",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }
}
