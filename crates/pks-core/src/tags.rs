//! Tag Manager
//!
//! Many-to-many string labels over pattern ids. Tags are normalized before
//! they are stored or queried, so `"Best Practice!"` and `"best-practice"`
//! name the same tag.

use rusqlite::{params, Connection};
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::patterns::repo::{self, PATTERN_COLUMNS};
use crate::types::Pattern;
use crate::utils::{now_utc, to_millis};

/// Normalize a tag: lowercase, whitespace to hyphens, strip anything outside
/// `[a-z0-9-]`, collapse repeated hyphens and trim them from both ends.
pub fn normalize_tag(tag: &str) -> Result<String> {
    let mut normalized = String::with_capacity(tag.len());
    for c in tag.trim().chars().flat_map(char::to_lowercase) {
        let c = if c.is_whitespace() { '-' } else { c };
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            continue;
        }
        if c == '-' && normalized.ends_with('-') {
            continue;
        }
        normalized.push(c);
    }

    let normalized = normalized.trim_matches('-').to_string();
    if normalized.is_empty() {
        return Err(Error::validation(format!("tag '{tag}' is empty after normalization")));
    }
    Ok(normalized)
}

/// Attach an already normalized tag. Returns false if it was present.
pub(crate) fn insert_tag(conn: &Connection, pattern_id: &str, tag: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pattern_tags (pattern_id, tag, created_at) VALUES (?1, ?2, ?3)",
        params![pattern_id, tag, to_millis(&now_utc())],
    )?;
    Ok(inserted > 0)
}

/// Copy every tag of `from` onto `to`, ignoring duplicates
pub(crate) fn copy_tags(conn: &Connection, from: &str, to: &str) -> Result<usize> {
    let copied = conn.execute(
        "INSERT OR IGNORE INTO pattern_tags (pattern_id, tag, created_at)
         SELECT ?2, tag, ?3 FROM pattern_tags WHERE pattern_id = ?1",
        params![from, to, to_millis(&now_utc())],
    )?;
    Ok(copied)
}

/// Tag bookkeeping for patterns
#[derive(Clone)]
pub struct TagManager {
    db: Arc<Database>,
}

impl TagManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add a tag. Returns false if the pattern already had it.
    pub fn add(&self, pattern_id: &str, tag: &str) -> Result<bool> {
        let tag = normalize_tag(tag)?;
        self.db.with_conn(|conn| {
            if !repo::exists(conn, pattern_id)? {
                return Err(Error::NotFound(pattern_id.to_string()));
            }
            let inserted = insert_tag(conn, pattern_id, &tag)?;
            debug!(pattern_id, %tag, inserted, "Tag added");
            Ok(inserted)
        })
    }

    /// Remove a tag. Returns false if it was not present.
    pub fn remove(&self, pattern_id: &str, tag: &str) -> Result<bool> {
        let tag = normalize_tag(tag)?;
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pattern_tags WHERE pattern_id = ?1 AND tag = ?2",
                params![pattern_id, tag],
            )?;
            Ok(removed > 0)
        })
    }

    /// Tags of one pattern, sorted
    pub fn get(&self, pattern_id: &str) -> Result<Vec<String>> {
        self.db.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT tag FROM pattern_tags WHERE pattern_id = ?1 ORDER BY tag")?;
            let tags = stmt
                .query_map(params![pattern_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(tags)
        })
    }

    /// Patterns carrying `tag`, highest confidence first, then most recently used
    pub fn get_patterns_by_tag(
        &self,
        tag: &str,
        min_confidence: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Pattern>> {
        let tag = normalize_tag(tag)?;
        self.db.with_reader(|conn| {
            let mut sql = format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns p
                 JOIN pattern_tags t ON t.pattern_id = p.id
                 WHERE t.tag = ?1 AND p.confidence >= ?2
                 ORDER BY p.confidence DESC, p.last_accessed DESC, p.id ASC"
            );
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let mut stmt = conn.prepare(&sql)?;
            let patterns = stmt
                .query_map(params![tag, min_confidence.unwrap_or(0.0)], repo::map_pattern)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(patterns)
        })
    }

    /// Every tag with its usage count, most used first
    pub fn list_all_tags(&self) -> Result<Vec<(String, i64)>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tag, COUNT(*) AS uses FROM pattern_tags
                 GROUP BY tag ORDER BY uses DESC, tag ASC",
            )?;
            let tags = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tags)
        })
    }
}
