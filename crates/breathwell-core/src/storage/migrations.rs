//! Schema migrations for the session store.
//!
//! Migrations are versioned and applied when the database is opened. The
//! `schema_version` table holds the version of the last applied migration.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{debug, warn};

/// Schema version after all migrations have run.
pub const CURRENT_VERSION: i32 = 2;

/// Bring the database up to [`CURRENT_VERSION`].
///
/// # Errors
/// Returns an error if any migration statement fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current = schema_version(conn);

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    if current < CURRENT_VERSION {
        debug!(from = current, to = CURRENT_VERSION, "session store migrated");
    }
    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Version of the last applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!("failed to read schema_version: {e}");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// v1: session records.
///
/// Timestamps are integer epoch milliseconds so range and proximity queries
/// compare numbers rather than strings.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id                  TEXT PRIMARY KEY,
            started_at_ms       INTEGER NOT NULL,
            ended_at_ms         INTEGER NOT NULL,
            cycles_completed    INTEGER NOT NULL,
            duration_secs       REAL NOT NULL,
            hrv_before          REAL,
            hrv_after           REAL,
            average_heart_rate  REAL,
            synced_to_health    INTEGER NOT NULL DEFAULT 0,
            source_device       TEXT NOT NULL
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// v2: indexes for the history and proximity queries.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at_ms);
         CREATE INDEX IF NOT EXISTS idx_sessions_device_started_at
             ON sessions(source_device, started_at_ms);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
