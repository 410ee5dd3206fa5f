//! Schema migrations.
//!
//! SQL migrations are embedded as strings and applied in order. Each applied
//! version is recorded in `schema_version`.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};
use crate::utils::{now_utc, to_millis};

/// Core tables (001)
pub const CORE_TABLES_SQL: &str = include_str!("001_core_tables.sql");

/// Full-text search index (002)
pub const SEARCH_INDEX_SQL: &str = include_str!("002_search_index.sql");

/// Ordered list of (version, sql)
pub const MIGRATIONS: &[(u32, &str)] = &[(1, CORE_TABLES_SQL), (2, SEARCH_INDEX_SQL)];

/// Highest schema version this build knows about
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at INTEGER NOT NULL
)";

/// Current schema version (0 for an empty database)
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.execute_batch(VERSION_TABLE_SQL)?;
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Apply every migration in `(current, target]` inside one transaction.
///
/// Returns `(old_version, new_version)`.
pub fn migrate(conn: &mut Connection, target: u32) -> Result<(u32, u32)> {
    if target > LATEST_SCHEMA_VERSION {
        return Err(Error::validation(format!(
            "unknown schema version {target} (latest is {LATEST_SCHEMA_VERSION})"
        )));
    }

    let old = current_version(conn)?;
    if old >= target {
        return Ok((old, old));
    }

    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > old && *v <= target) {
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![version, to_millis(&now_utc())],
        )?;
        info!(version, "Applied schema migration");
    }
    tx.commit()?;

    Ok((old, target))
}
