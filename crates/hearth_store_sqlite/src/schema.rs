//! Schema creation and versioned migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma; migrations
//! run in order inside one transaction per version step, so a partially
//! applied migration never sticks.

use hearth_registry::StoreError;
use rusqlite::Connection;
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_HOMES: &str = "
CREATE TABLE IF NOT EXISTS homes (
    owner_id   TEXT NOT NULL,
    home_name  TEXT NOT NULL COLLATE NOCASE CHECK (length(home_name) <= 32),
    world      TEXT NOT NULL,
    x          REAL NOT NULL,
    y          REAL NOT NULL,
    z          REAL NOT NULL,
    yaw        REAL NOT NULL DEFAULT 0,
    pitch      REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, home_name)
)";

const CREATE_VISITS: &str = "
CREATE TABLE IF NOT EXISTS home_visits (
    owner_id    TEXT NOT NULL,
    home_name   TEXT NOT NULL COLLATE NOCASE,
    visit_count INTEGER NOT NULL DEFAULT 0,
    last_visit  INTEGER NOT NULL,
    PRIMARY KEY (owner_id, home_name)
)";

/// Brings the database up to [`SCHEMA_VERSION`]. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let mut version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(crate::map_sql_err)?;

    while version < SCHEMA_VERSION {
        let tx = conn.transaction().map_err(crate::map_sql_err)?;
        match version {
            0 => {
                tx.execute(CREATE_HOMES, []).map_err(crate::map_sql_err)?;
                tx.execute(CREATE_VISITS, []).map_err(crate::map_sql_err)?;
            }
            other => {
                return Err(StoreError::Query(format!(
                    "no migration from schema version {other}"
                )));
            }
        }
        version += 1;
        tx.pragma_update(None, "user_version", version)
            .map_err(crate::map_sql_err)?;
        tx.commit().map_err(crate::map_sql_err)?;
        info!("Migrated home database to schema version {}", version);
    }
    Ok(())
}
