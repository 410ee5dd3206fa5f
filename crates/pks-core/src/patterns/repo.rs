//! Connection-level pattern persistence.
//!
//! Every write to the `patterns` table goes through this module, whether it
//! comes from the public store, decay, consolidation or reconciliation. The
//! functions take a `&Connection` so callers can run them inside their own
//! transaction. Confidence is clamped here; `id` and `created_at` are never
//! rewritten after insert.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::{
    clamp_confidence, Metadata, Pattern, PatternFilter, PatternScope, PatternType,
};
use crate::utils::{from_millis, now_utc, to_millis};

pub(crate) const PATTERN_COLUMNS: &str = "p.id, p.title, p.content, p.pattern_type, p.confidence, \
     p.scope, p.namespaces, p.is_pinned, p.created_at, p.last_accessed, p.access_count, p.metadata";

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Map a row selected with [`PATTERN_COLUMNS`]
pub(crate) fn map_pattern(row: &Row) -> rusqlite::Result<Pattern> {
    let scope: String = row.get(5)?;
    let scope = scope.parse::<PatternScope>().map_err(|e| {
        conversion_error(5, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;

    let namespaces: String = row.get(6)?;
    let namespaces: BTreeSet<String> =
        serde_json::from_str(&namespaces).map_err(|e| conversion_error(6, e))?;

    let metadata: String = row.get(11)?;
    let metadata: Metadata = serde_json::from_str(&metadata).map_err(|e| conversion_error(11, e))?;

    Ok(Pattern {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        pattern_type: PatternType::from(row.get::<_, String>(3)?),
        confidence: row.get(4)?,
        scope,
        namespaces,
        is_pinned: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        last_accessed: from_millis(row.get(9)?),
        access_count: row.get(10)?,
        metadata,
    })
}

pub(crate) fn exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM patterns WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn fetch(conn: &Connection, id: &str) -> Result<Option<Pattern>> {
    let sql = format!("SELECT {PATTERN_COLUMNS} FROM patterns p WHERE p.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_pattern).optional()?)
}

pub(crate) fn fetch_many(conn: &Connection, ids: &[String]) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(pattern) = fetch(conn, id)? {
            patterns.push(pattern);
        }
    }
    Ok(patterns)
}

/// Insert a new row. Fails with `AlreadyExists` if the id is taken.
pub(crate) fn insert(conn: &Connection, pattern: &Pattern) -> Result<()> {
    if pattern.id.trim().is_empty() {
        return Err(Error::validation("pattern id must not be empty"));
    }
    if exists(conn, &pattern.id)? {
        return Err(Error::AlreadyExists(pattern.id.clone()));
    }

    conn.execute(
        "INSERT INTO patterns
         (id, title, content, pattern_type, confidence, scope, namespaces, is_pinned,
          created_at, last_accessed, access_count, metadata, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            pattern.id,
            pattern.title,
            pattern.content,
            pattern.pattern_type.as_str(),
            clamp_confidence(pattern.confidence),
            pattern.scope.as_str(),
            serde_json::to_string(&pattern.namespaces)?,
            pattern.is_pinned,
            to_millis(&pattern.created_at),
            to_millis(&pattern.last_accessed),
            pattern.access_count.max(0),
            serde_json::to_string(&pattern.metadata)?,
            to_millis(&now_utc()),
        ],
    )?;
    Ok(())
}

/// Persist every mutable field of `pattern`. Returns false if the id is unknown.
pub(crate) fn save(conn: &Connection, pattern: &Pattern) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE patterns SET
            title = ?2, content = ?3, pattern_type = ?4, confidence = ?5, scope = ?6,
            namespaces = ?7, is_pinned = ?8, last_accessed = ?9, access_count = ?10,
            metadata = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            pattern.id,
            pattern.title,
            pattern.content,
            pattern.pattern_type.as_str(),
            clamp_confidence(pattern.confidence),
            pattern.scope.as_str(),
            serde_json::to_string(&pattern.namespaces)?,
            pattern.is_pinned,
            to_millis(&pattern.last_accessed),
            pattern.access_count.max(0),
            serde_json::to_string(&pattern.metadata)?,
            to_millis(&now_utc()),
        ],
    )?;
    Ok(changed > 0)
}

pub(crate) fn set_confidence(conn: &Connection, id: &str, confidence: f64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE patterns SET confidence = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, clamp_confidence(confidence), to_millis(&now_utc())],
    )?;
    Ok(changed > 0)
}

pub(crate) fn set_pinned(conn: &Connection, id: &str, pinned: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE patterns SET is_pinned = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, pinned, to_millis(&now_utc())],
    )?;
    Ok(changed > 0)
}

/// Record one use of a pattern
pub(crate) fn touch(conn: &Connection, id: &str, at: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE patterns SET access_count = access_count + (access_count < ?3), \
         last_accessed = ?2 WHERE id = ?1",
        params![id, at, i64::MAX],
    )?;
    Ok(changed > 0)
}

pub(crate) fn remove(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Append a clause restricting `p` to rows carrying `namespace`
pub(crate) fn namespace_clause(
    namespace: &str,
    params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
) -> &'static str {
    params_vec.push(Box::new(namespace.to_string()));
    " AND EXISTS (SELECT 1 FROM json_each(p.namespaces) WHERE json_each.value = ?)"
}

pub(crate) fn list(conn: &Connection, filter: &PatternFilter) -> Result<Vec<Pattern>> {
    let mut sql = format!("SELECT {PATTERN_COLUMNS} FROM patterns p WHERE 1=1");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref pattern_type) = filter.pattern_type {
        sql.push_str(" AND p.pattern_type = ?");
        params_vec.push(Box::new(pattern_type.as_str().to_string()));
    }

    if let Some(scope) = filter.scope {
        sql.push_str(" AND p.scope = ?");
        params_vec.push(Box::new(scope.as_str()));
    }

    if let Some(ref namespace) = filter.namespace {
        sql.push_str(namespace_clause(namespace, &mut params_vec));
    }

    if let Some(min) = filter.min_confidence {
        sql.push_str(" AND p.confidence >= ?");
        params_vec.push(Box::new(min));
    }

    if let Some(max) = filter.max_confidence {
        sql.push_str(" AND p.confidence <= ?");
        params_vec.push(Box::new(max));
    }

    if let Some(pinned) = filter.pinned {
        sql.push_str(" AND p.is_pinned = ?");
        params_vec.push(Box::new(pinned));
    }

    sql.push_str(" ORDER BY p.confidence DESC, p.id ASC");

    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let patterns = stmt
        .query_map(param_refs.as_slice(), map_pattern)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(patterns)
}
