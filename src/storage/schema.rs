//! Database schema definitions.
//!
//! One table per synced collection, named and columned exactly like the
//! remote documents (camelCase, so identifiers are quoted). There is a single
//! fixed schema version; opening a database written with a different
//! version is an error rather than a migration.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::model::Collection;

/// The only schema version this build reads or writes.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// The complete SQL schema for the Deskline database.
///
/// `id` columns carry no type affinity: they hold an integer for locally
/// assigned keys and text for opaque keys that arrived from the remote.
/// Reference columns (`userId`, `callId`, `assigneeId`) work the same way.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Synced collections
-- ====================

CREATE TABLE IF NOT EXISTS "users" (
    "id" NOT NULL PRIMARY KEY,
    "name" TEXT NOT NULL,
    "pin" TEXT NOT NULL,
    "role" TEXT NOT NULL DEFAULT 'agent'
);

CREATE INDEX IF NOT EXISTS idx_users_name ON "users"("name" COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS "calls" (
    "id" NOT NULL PRIMARY KEY,
    "clientName" TEXT NOT NULL,
    "duration" INTEGER NOT NULL DEFAULT 0,
    "timestamp" INTEGER NOT NULL,
    "dateString" TEXT NOT NULL DEFAULT '',
    "userId",
    "audioRef" TEXT
);

CREATE INDEX IF NOT EXISTS idx_calls_timestamp ON "calls"("timestamp");
CREATE INDEX IF NOT EXISTS idx_calls_user ON "calls"("userId");
CREATE INDEX IF NOT EXISTS idx_calls_client ON "calls"("clientName");

CREATE TABLE IF NOT EXISTS "activities" (
    "id" NOT NULL PRIMARY KEY,
    "title" TEXT NOT NULL,
    "status" TEXT NOT NULL DEFAULT 'pending',
    "timestamp" INTEGER NOT NULL,
    "userId"
);

CREATE INDEX IF NOT EXISTS idx_activities_timestamp ON "activities"("timestamp");
CREATE INDEX IF NOT EXISTS idx_activities_status ON "activities"("status");
CREATE INDEX IF NOT EXISTS idx_activities_user ON "activities"("userId");

CREATE TABLE IF NOT EXISTS "tickets" (
    "id" NOT NULL PRIMARY KEY,
    "description" TEXT NOT NULL,
    "status" TEXT NOT NULL DEFAULT 'Open',
    "priority" TEXT NOT NULL DEFAULT 'Medium',
    "createdAt" INTEGER NOT NULL,
    "dateString" TEXT NOT NULL DEFAULT '',
    "clientName" TEXT NOT NULL DEFAULT '',
    "userId",
    "assigneeId",
    "callId",
    "duration" INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tickets_created ON "tickets"("createdAt");
CREATE INDEX IF NOT EXISTS idx_tickets_status ON "tickets"("status");
CREATE INDEX IF NOT EXISTS idx_tickets_user ON "tickets"("userId");
CREATE INDEX IF NOT EXISTS idx_tickets_call ON "tickets"("callId");
CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON "tickets"("assigneeId");
CREATE INDEX IF NOT EXISTS idx_tickets_client ON "tickets"("clientName");

CREATE TABLE IF NOT EXISTS "caseNotes" (
    "id" NOT NULL PRIMARY KEY,
    "dateString" TEXT NOT NULL,
    "caseType" TEXT NOT NULL DEFAULT '',
    "clientName" TEXT NOT NULL,
    "notes" TEXT NOT NULL,
    "userId",
    "timestamp" INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_case_notes_timestamp ON "caseNotes"("timestamp");
CREATE INDEX IF NOT EXISTS idx_case_notes_client ON "caseNotes"("clientName");
CREATE INDEX IF NOT EXISTS idx_case_notes_user ON "caseNotes"("userId");

-- ====================
-- Local bookkeeping (never synced as documents)
-- ====================

-- Audio payloads keyed by sha256 of their content
CREATE TABLE IF NOT EXISTS blobs (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Next auto-increment id per collection
CREATE TABLE IF NOT EXISTS key_counters (
    collection TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Columns of a collection's table, excluding `id`.
///
/// Document fields outside this list are not stored.
#[must_use]
pub const fn columns(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Users => &["name", "pin", "role"],
        Collection::Calls => &[
            "clientName",
            "duration",
            "timestamp",
            "dateString",
            "userId",
            "audioRef",
        ],
        Collection::Activities => &["title", "status", "timestamp", "userId"],
        Collection::Tickets => &[
            "description",
            "status",
            "priority",
            "createdAt",
            "dateString",
            "clientName",
            "userId",
            "assigneeId",
            "callId",
            "duration",
        ],
        Collection::CaseNotes => &[
            "dateString",
            "caseType",
            "clientName",
            "notes",
            "userId",
            "timestamp",
        ],
    }
}

/// Apply the database schema.
///
/// Sets connection pragmas, creates missing tables, and stamps the schema
/// version on a fresh database.
///
/// # Errors
///
/// Returns an error if the SQL fails or the database was written by a
/// different schema version.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it can't go through pragma_update
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    let existing: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![CURRENT_SCHEMA_VERSION, chrono::Utc::now().timestamp_millis()],
            )?;
        }
        Some(v) if v == CURRENT_SCHEMA_VERSION => {}
        Some(v) => {
            return Err(Error::Other(format!(
                "Database schema version {v} is not supported (expected {CURRENT_SCHEMA_VERSION})"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for collection in Collection::ALL {
            assert!(tables.contains(&collection.as_str().to_string()), "{collection}");
        }
        assert!(tables.contains(&"blobs".to_string()));
        assert!(tables.contains(&"key_counters".to_string()));
        assert!(tables.contains(&"meta".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_foreign_version_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 99", []).unwrap();
        assert!(apply_schema(&conn).is_err());
    }

    #[test]
    fn test_id_column_keeps_both_key_kinds() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            r#"INSERT INTO "users" ("id", "name", "pin") VALUES (1, 'a', '1'), ('x-1', 'b', '2')"#,
            [],
        )
        .unwrap();
        let kinds: Vec<String> = conn
            .prepare(r#"SELECT typeof("id") FROM "users" ORDER BY "name""#)
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(kinds, ["integer", "text"]);
    }

    #[test]
    fn test_columns_match_tables() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        for collection in Collection::ALL {
            let mut stmt = conn
                .prepare(&format!("SELECT name FROM pragma_table_info('{}')", collection.as_str()))
                .unwrap();
            let names: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(names[0], "id");
            assert_eq!(&names[1..], columns(collection), "{collection}");
        }
    }
}
