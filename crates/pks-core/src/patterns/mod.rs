//! Pattern Store: CRUD over pattern records.
//!
//! This is the ground truth. Raw `get` has no side effects; usage is recorded
//! only by [`crate::search::PatternSearch`].
//!
//! Protected patterns (protected scope or the sentinel namespace) are rejected
//! by `update`/`delete`/`pin`/`unpin` unless the caller passes
//! [`WriteAccess::Administrative`].

pub(crate) mod repo;

use rusqlite::{params, Connection};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{
    clamp_confidence, NewPattern, Pattern, PatternFilter, PatternScope, PatternUpdate, StoreStats,
    WriteAccess,
};
use crate::utils::now_utc;

/// Default confidence for patterns stored without one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// CRUD access to patterns.
#[derive(Clone)]
pub struct PatternStore {
    db: Arc<Database>,
}

impl PatternStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new pattern, assigning an id if none was given.
    pub fn store(&self, input: NewPattern) -> Result<Pattern> {
        if input.title.trim().is_empty() {
            return Err(Error::validation("pattern title must not be empty"));
        }

        let now = now_utc();
        let pattern = Pattern {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: input.title,
            content: input.content,
            pattern_type: input.pattern_type,
            confidence: clamp_confidence(input.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            scope: input.scope.unwrap_or(PatternScope::Application),
            namespaces: input.namespaces,
            is_pinned: input.is_pinned,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            metadata: input.metadata,
        };

        self.db.with_conn(|conn| repo::insert(conn, &pattern))?;
        debug!(id = %pattern.id, pattern_type = %pattern.pattern_type, "Stored pattern");
        Ok(pattern)
    }

    /// Get a pattern by id. No side effects.
    pub fn get(&self, id: &str) -> Result<Option<Pattern>> {
        self.db.with_reader(|conn| repo::fetch(conn, id))
    }

    /// Apply a partial update. Returns false if the id is unknown.
    pub fn update(&self, id: &str, update: &PatternUpdate) -> Result<bool> {
        self.update_with(id, update, WriteAccess::Standard)
    }

    /// Apply a partial update with explicit access level.
    pub fn update_with(
        &self,
        id: &str,
        update: &PatternUpdate,
        access: WriteAccess,
    ) -> Result<bool> {
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(Error::validation("pattern title must not be empty"));
            }
        }

        self.db.transaction(|tx| {
            let Some(mut pattern) = repo::fetch(tx, id)? else {
                debug!(id, "Update skipped: pattern not found");
                return Ok(false);
            };
            check_access(&pattern, access, "update")?;

            update.apply_to(&mut pattern);
            repo::save(tx, &pattern)
        })
    }

    /// Delete a pattern. Returns false if the id is unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.delete_with(id, WriteAccess::Standard)
    }

    /// Delete a pattern with explicit access level.
    pub fn delete_with(&self, id: &str, access: WriteAccess) -> Result<bool> {
        self.db.transaction(|tx| {
            let Some(pattern) = repo::fetch(tx, id)? else {
                debug!(id, "Delete skipped: pattern not found");
                return Ok(false);
            };
            check_access(&pattern, access, "delete")?;

            let removed = repo::remove(tx, id)?;
            if removed {
                info!(id, "Deleted pattern");
            }
            Ok(removed)
        })
    }

    /// List patterns matching `filter`, highest confidence first.
    pub fn list(&self, filter: &PatternFilter) -> Result<Vec<Pattern>> {
        self.db.with_reader(|conn| repo::list(conn, filter))
    }

    /// Pin a pattern so decay never touches it
    pub fn pin(&self, id: &str) -> Result<bool> {
        self.pin_with(id, WriteAccess::Standard)
    }

    /// Remove a pin
    pub fn unpin(&self, id: &str) -> Result<bool> {
        self.unpin_with(id, WriteAccess::Standard)
    }

    /// Pin with explicit access level.
    pub fn pin_with(&self, id: &str, access: WriteAccess) -> Result<bool> {
        self.db.transaction(|tx| set_pinned_with(tx, id, true, access))
    }

    /// Unpin with explicit access level.
    pub fn unpin_with(&self, id: &str, access: WriteAccess) -> Result<bool> {
        self.db.transaction(|tx| set_pinned_with(tx, id, false, access))
    }

    /// Total number of patterns
    pub fn count(&self) -> Result<i64> {
        self.db.with_reader(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?)
        })
    }

    /// Aggregate counts by scope, pin state and type
    pub fn stats(&self) -> Result<StoreStats> {
        self.db.with_reader(|conn| {
            let mut stats = StoreStats::default();

            let mut stmt = conn.prepare("SELECT scope, namespaces, is_pinned FROM patterns")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?;
            for row in rows {
                let (scope, namespaces, pinned) = row?;
                let scope = scope.parse::<PatternScope>().map_err(Error::Validation)?;
                let namespaces: Vec<String> = serde_json::from_str(&namespaces)?;

                stats.total += 1;
                if crate::types::is_protected(scope, &namespaces) {
                    stats.protected += 1;
                } else {
                    stats.application += 1;
                }
                if pinned {
                    stats.pinned += 1;
                }
            }

            let mut stmt = conn.prepare(
                "SELECT pattern_type, COUNT(*) FROM patterns
                 GROUP BY pattern_type ORDER BY pattern_type",
            )?;
            let by_type = stmt.query_map(params![], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for entry in by_type {
                let (pattern_type, count) = entry?;
                stats.by_type.insert(pattern_type, count);
            }

            Ok(stats)
        })
    }
}

/// Flip the pin flag, subject to the same protection rule as `update`
pub(crate) fn set_pinned_with(
    conn: &Connection,
    id: &str,
    pinned: bool,
    access: WriteAccess,
) -> Result<bool> {
    let Some(pattern) = repo::fetch(conn, id)? else {
        debug!(id, "Pin change skipped: pattern not found");
        return Ok(false);
    };
    check_access(&pattern, access, if pinned { "pin" } else { "unpin" })?;
    repo::set_pinned(conn, id, pinned)
}

fn check_access(pattern: &Pattern, access: WriteAccess, operation: &str) -> Result<()> {
    if !pattern.is_protected() {
        return Ok(());
    }
    match access {
        WriteAccess::Standard => Err(Error::Protected(pattern.id.clone())),
        WriteAccess::Administrative => {
            warn!(id = %pattern.id, operation, "Administrative override on protected pattern");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatternType, PROTECTED_NAMESPACE};

    fn setup() -> PatternStore {
        PatternStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_store_assigns_defaults() {
        let store = setup();
        let pattern = store
            .store(NewPattern::new("Run migrations", "cargo sqlx migrate run", "workflow"))
            .unwrap();

        assert!(!pattern.id.is_empty());
        assert_eq!(pattern.scope, PatternScope::Application);
        assert_eq!(pattern.access_count, 0);
        assert_eq!(pattern.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(pattern.pattern_type, PatternType::Workflow);

        let fetched = store.get(&pattern.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Run migrations");
        assert_eq!(fetched.access_count, 0);
    }

    #[test]
    fn test_store_clamps_confidence_and_rejects_duplicates() {
        let store = setup();
        let pattern = store
            .store(NewPattern::new("t", "c", "fact").with_id("p1").with_confidence(3.0))
            .unwrap();
        assert_eq!(pattern.confidence, 1.0);

        let dup = store.store(NewPattern::new("t2", "c2", "fact").with_id("p1"));
        assert!(matches!(dup, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_get_has_no_side_effects() {
        let store = setup();
        let pattern = store.store(NewPattern::new("t", "c", "fact")).unwrap();
        store.get(&pattern.id).unwrap();
        store.get(&pattern.id).unwrap();
        assert_eq!(store.get(&pattern.id).unwrap().unwrap(), pattern);
    }

    #[test]
    fn test_update_and_delete_unknown_id() {
        let store = setup();
        let update = PatternUpdate {
            confidence: Some(0.9),
            ..Default::default()
        };
        assert!(!store.update("missing", &update).unwrap());
        assert!(!store.delete("missing").unwrap());
    }

    #[test]
    fn test_update_clamps_and_keeps_identity() {
        let store = setup();
        let original = store
            .store(NewPattern::new("t", "c", "fact").with_id("p1"))
            .unwrap();

        let update = PatternUpdate {
            title: Some("renamed".into()),
            confidence: Some(-4.0),
            ..Default::default()
        };
        assert!(store.update("p1", &update).unwrap());

        let updated = store.get("p1").unwrap().unwrap();
        assert_eq!(updated.id, "p1");
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.confidence, 0.0);
        assert_eq!(updated.created_at, original.created_at);
    }

    #[test]
    fn test_protected_requires_override() {
        let store = setup();
        store
            .store(
                NewPattern::new("Generic", "cross-project", "convention")
                    .with_id("g1")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Sentinel", "namespace protected", "convention")
                    .with_id("g2")
                    .with_namespace(PROTECTED_NAMESPACE),
            )
            .unwrap();

        let update = PatternUpdate {
            confidence: Some(0.1),
            ..Default::default()
        };
        assert!(matches!(store.update("g1", &update), Err(Error::Protected(_))));
        assert!(matches!(store.delete("g2"), Err(Error::Protected(_))));

        assert!(store
            .update_with("g1", &update, WriteAccess::Administrative)
            .unwrap());
        assert_eq!(store.get("g1").unwrap().unwrap().confidence, 0.1);
        assert!(store.delete_with("g2", WriteAccess::Administrative).unwrap());
        assert!(store.get("g2").unwrap().is_none());
    }

    #[test]
    fn test_pin_protected_requires_override() {
        let store = setup();
        store
            .store(
                NewPattern::new("Generic", "cross-project", "convention")
                    .with_id("g1")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();
        store.store(NewPattern::new("Local", "app only", "fact").with_id("a1")).unwrap();

        assert!(matches!(store.pin("g1"), Err(Error::Protected(_))));
        assert!(!store.get("g1").unwrap().unwrap().is_pinned);

        assert!(store.pin_with("g1", WriteAccess::Administrative).unwrap());
        assert!(store.get("g1").unwrap().unwrap().is_pinned);
        assert!(matches!(store.unpin("g1"), Err(Error::Protected(_))));
        assert!(store.unpin_with("g1", WriteAccess::Administrative).unwrap());
        assert!(!store.get("g1").unwrap().unwrap().is_pinned);

        assert!(store.pin("a1").unwrap());
        assert!(store.get("a1").unwrap().unwrap().is_pinned);
        assert!(!store.pin("missing").unwrap());
    }

    #[test]
    fn test_list_filters() {
        let store = setup();
        store
            .store(NewPattern::new("a", "a", "workflow").with_confidence(0.9).with_namespace("web"))
            .unwrap();
        store
            .store(NewPattern::new("b", "b", "workflow").with_confidence(0.4))
            .unwrap();
        store
            .store(NewPattern::new("c", "c", "intent").with_confidence(0.7).pinned())
            .unwrap();

        let workflows = store
            .list(&PatternFilter {
                pattern_type: Some(PatternType::Workflow),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(workflows.len(), 2);
        assert_eq!(workflows[0].title, "a");

        let web = store
            .list(&PatternFilter {
                namespace: Some("web".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(web.len(), 1);

        let confident = store
            .list(&PatternFilter {
                min_confidence: Some(0.6),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(confident.len(), 1);
        assert_eq!(confident[0].title, "a");

        let pinned = store
            .list(&PatternFilter {
                pinned: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].title, "c");
    }

    #[test]
    fn test_stats() {
        let store = setup();
        store.store(NewPattern::new("a", "a", "workflow")).unwrap();
        store
            .store(NewPattern::new("b", "b", "workflow").with_scope(PatternScope::Protected))
            .unwrap();
        store
            .store(NewPattern::new("c", "c", "fact").with_namespace(PROTECTED_NAMESPACE).pinned())
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.protected, 2);
        assert_eq!(stats.application, 1);
        assert_eq!(stats.pinned, 1);
        assert_eq!(stats.by_type.get("workflow"), Some(&2));
        assert_eq!(store.count().unwrap(), 3);
    }
}
