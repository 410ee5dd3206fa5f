//! Pattern Search
//!
//! Ranked lookup over title and content using the FTS5 index. Retrieval
//! through this module is the only place usage is recorded: every returned
//! pattern gets its `access_count` bumped and `last_accessed` set to now.

use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::patterns::repo::{self, PATTERN_COLUMNS};
use crate::types::{Pattern, PatternScope, PatternType, PROTECTED_NAMESPACE};
use crate::utils::{now_utc, to_millis};

/// Optional filters applied on top of the text query
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub pattern_type: Option<PatternType>,
    pub scope: Option<PatternScope>,
    pub namespace: Option<String>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restriction {
    None,
    ProtectedOnly,
}

/// Ranked search over the pattern store
#[derive(Clone)]
pub struct PatternSearch {
    db: Arc<Database>,
}

impl PatternSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Full-text search ordered by relevance, confidence, then recency.
    ///
    /// An empty query (or one with no searchable words) lists by filters.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<Pattern>> {
        let hits = self.ranked(query, filters, Restriction::None, limit)?;
        self.record_hits(hits)
    }

    /// Search only protected patterns (protected scope or sentinel namespace)
    pub fn search_protected(&self, query: &str, limit: usize) -> Result<Vec<Pattern>> {
        let hits = self.ranked(
            query,
            &SearchFilters::default(),
            Restriction::ProtectedOnly,
            limit,
        )?;
        self.record_hits(hits)
    }

    /// Search application patterns carrying `namespace`
    pub fn search_namespace(
        &self,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<Pattern>> {
        let filters = SearchFilters {
            scope: Some(PatternScope::Application),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        let hits = self.ranked(query, &filters, Restriction::None, limit)?;
        self.record_hits(hits)
    }

    /// Namespace matches first, then protected patterns, without duplicates.
    pub fn search_with_namespace_priority(
        &self,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<Pattern>> {
        let filters = SearchFilters {
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        let mut hits = self.ranked(query, &filters, Restriction::None, limit)?;

        if hits.len() < limit {
            let mut seen: HashSet<String> = hits.iter().map(|p| p.id.clone()).collect();
            let fallback =
                self.ranked(query, &SearchFilters::default(), Restriction::ProtectedOnly, limit)?;
            for pattern in fallback {
                if hits.len() >= limit {
                    break;
                }
                if seen.insert(pattern.id.clone()) {
                    hits.push(pattern);
                }
            }
        }

        self.record_hits(hits)
    }

    /// Record one use of a pattern outside of a search. Returns false if unknown.
    pub fn record_usage(&self, id: &str) -> Result<bool> {
        let now = to_millis(&now_utc());
        self.db.with_conn(|conn| repo::touch(conn, id, now))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn ranked(
        &self,
        query: &str,
        filters: &SearchFilters,
        restriction: Restriction,
        limit: usize,
    ) -> Result<Vec<Pattern>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let fts_query = fts_query(query);
        self.db
            .with_reader(|conn| run_query(conn, fts_query.as_deref(), filters, restriction, limit))
    }

    fn record_hits(&self, mut hits: Vec<Pattern>) -> Result<Vec<Pattern>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let now = now_utc();
        let at = to_millis(&now);
        self.db.transaction(|tx| {
            for pattern in &hits {
                repo::touch(tx, &pattern.id, at)?;
            }
            Ok(())
        })?;

        for pattern in &mut hits {
            pattern.access_count = pattern.access_count.saturating_add(1);
            pattern.last_accessed = now;
        }
        debug!(count = hits.len(), "Recorded search hits");
        Ok(hits)
    }
}

/// Build an FTS5 MATCH expression: every word quoted, joined with OR.
///
/// Returns `None` when the query has no searchable words.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{}\"", word.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn run_query(
    conn: &Connection,
    fts_query: Option<&str>,
    filters: &SearchFilters,
    restriction: Restriction,
    limit: usize,
) -> Result<Vec<Pattern>> {
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    let mut sql = match fts_query {
        Some(q) => {
            params_vec.push(Box::new(q.to_string()));
            format!(
                "SELECT {PATTERN_COLUMNS}, -bm25(patterns_fts) AS relevance
                 FROM patterns_fts
                 JOIN patterns p ON p.rowid = patterns_fts.rowid
                 WHERE patterns_fts MATCH ?"
            )
        }
        None => format!("SELECT {PATTERN_COLUMNS}, 0.0 AS relevance FROM patterns p WHERE 1=1"),
    };

    if let Some(ref pattern_type) = filters.pattern_type {
        sql.push_str(" AND p.pattern_type = ?");
        params_vec.push(Box::new(pattern_type.as_str().to_string()));
    }

    if let Some(scope) = filters.scope {
        sql.push_str(" AND p.scope = ?");
        params_vec.push(Box::new(scope.as_str()));
    }

    if let Some(ref namespace) = filters.namespace {
        sql.push_str(repo::namespace_clause(namespace, &mut params_vec));
    }

    if let Some(min) = filters.min_confidence {
        sql.push_str(" AND p.confidence >= ?");
        params_vec.push(Box::new(min));
    }

    if restriction == Restriction::ProtectedOnly {
        sql.push_str(
            " AND (p.scope = 'protected' \
             OR EXISTS (SELECT 1 FROM json_each(p.namespaces) WHERE json_each.value = ?))",
        );
        params_vec.push(Box::new(PROTECTED_NAMESPACE));
    }

    sql.push_str(" ORDER BY relevance DESC, p.confidence DESC, p.last_accessed DESC, p.id ASC");
    sql.push_str(&format!(" LIMIT {}", limit));

    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let patterns = stmt
        .query_map(param_refs.as_slice(), repo::map_pattern)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternStore;
    use crate::types::NewPattern;

    fn setup() -> (PatternStore, PatternSearch) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (PatternStore::new(db.clone()), PatternSearch::new(db))
    }

    #[test]
    fn test_usage_count_saturates() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = PatternStore::new(db.clone());
        let search = PatternSearch::new(db.clone());
        store.store(NewPattern::new("Flaky test", "retry once", "fact").with_id("a")).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE patterns SET access_count = ?1", [i64::MAX])?;
            Ok(())
        })
        .unwrap();

        let hits = search.search("flaky", &SearchFilters::default(), 10).unwrap();
        assert_eq!(hits[0].access_count, i64::MAX);
        assert_eq!(store.get("a").unwrap().unwrap().access_count, i64::MAX);
    }

    #[test]
    fn test_fts_query_quotes_words() {
        assert_eq!(
            fts_query("retry AND \"backoff\"*"),
            Some("\"retry\" OR \"and\" OR \"backoff\"".into())
        );
        assert_eq!(fts_query("  -- ** "), None);
        assert_eq!(fts_query(""), None);
    }

    #[test]
    fn test_search_ranks_by_relevance() {
        let (store, search) = setup();
        store
            .store(
                NewPattern::new("Retry with backoff", "retry retry failed requests", "solution")
                    .with_id("a"),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Cache warmup", "warm the cache before retry", "solution")
                    .with_id("b"),
            )
            .unwrap();
        store
            .store(NewPattern::new("Unrelated", "nothing to see here", "fact").with_id("c"))
            .unwrap();

        let results = search.search("retry", &SearchFilters::default(), 10).unwrap();
        let ids: Vec<&str> = results.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_search_tie_breaks_on_confidence() {
        let (store, search) = setup();
        store
            .store(
                NewPattern::new("deploy", "deploy", "workflow")
                    .with_id("low")
                    .with_confidence(0.4),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("deploy", "deploy", "workflow")
                    .with_id("high")
                    .with_confidence(0.9),
            )
            .unwrap();

        let results = search.search("deploy", &SearchFilters::default(), 10).unwrap();
        assert_eq!(results[0].id, "high");
        assert_eq!(results[1].id, "low");
    }

    #[test]
    fn test_search_records_usage() {
        let (store, search) = setup();
        let stored = store
            .store(NewPattern::new("Lint before commit", "run clippy", "workflow"))
            .unwrap();

        let results = search.search("clippy", &SearchFilters::default(), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].access_count, 1);

        let fetched = store.get(&stored.id).unwrap().unwrap();
        assert_eq!(fetched.access_count, 1);
        assert!(fetched.last_accessed >= stored.last_accessed);

        assert!(search.record_usage(&stored.id).unwrap());
        assert_eq!(store.get(&stored.id).unwrap().unwrap().access_count, 2);
        assert!(!search.record_usage("missing").unwrap());
    }

    #[test]
    fn test_empty_query_lists_by_filters() {
        let (store, search) = setup();
        store
            .store(NewPattern::new("a", "a", "workflow").with_confidence(0.2))
            .unwrap();
        store
            .store(NewPattern::new("b", "b", "workflow").with_confidence(0.8))
            .unwrap();
        store.store(NewPattern::new("c", "c", "fact")).unwrap();

        let filters = SearchFilters {
            pattern_type: Some(PatternType::Workflow),
            ..Default::default()
        };
        let results = search.search("", &filters, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "b");

        let filters = SearchFilters {
            min_confidence: Some(0.5),
            ..Default::default()
        };
        assert_eq!(search.search("   ", &filters, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_protected_and_namespace_variants() {
        let (store, search) = setup();
        store
            .store(
                NewPattern::new("Error handling", "propagate errors", "convention")
                    .with_id("generic")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Error handling", "map errors at the edge", "convention")
                    .with_id("sentinel")
                    .with_namespace(PROTECTED_NAMESPACE),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Error handling", "web errors become 500s", "convention")
                    .with_id("web")
                    .with_namespace("web"),
            )
            .unwrap();

        let protected = search.search_protected("errors", 10).unwrap();
        let mut ids: Vec<&str> = protected.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["generic", "sentinel"]);

        let web = search.search_namespace("errors", "web", 10).unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].id, "web");
    }

    #[test]
    fn test_namespace_priority_blends_and_dedupes() {
        let (store, search) = setup();
        store
            .store(
                NewPattern::new("Logging", "structured logging setup", "convention")
                    .with_id("generic")
                    .with_scope(PatternScope::Protected)
                    .with_confidence(1.0),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Logging", "api logging middleware", "convention")
                    .with_id("api")
                    .with_namespace("api")
                    .with_confidence(0.3),
            )
            .unwrap();
        store
            .store(
                NewPattern::new("Logging", "protected api logging", "convention")
                    .with_id("both")
                    .with_namespace("api")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();

        let results = search
            .search_with_namespace_priority("logging", "api", 10)
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids[..2].contains(&"api"));
        assert!(ids[..2].contains(&"both"));
        assert_eq!(ids[2], "generic");

        // Each pattern is recorded once even when it matched both passes.
        assert_eq!(store.get("both").unwrap().unwrap().access_count, 1);

        let limited = search
            .search_with_namespace_priority("logging", "api", 1)
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
