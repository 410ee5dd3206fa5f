//! Relationship Manager
//!
//! Typed, directed edges between patterns. Edges are deleted together with
//! either endpoint.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::patterns::repo;
use crate::tags::normalize_tag;
use crate::utils::{from_millis, now_utc, to_millis};

/// Edge label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipKind {
    Supersedes,
    RelatedTo,
    DependsOn,
    ConflictsWith,
    Other(String),
}

impl RelationshipKind {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipKind::Supersedes => "supersedes",
            RelationshipKind::RelatedTo => "related-to",
            RelationshipKind::DependsOn => "depends-on",
            RelationshipKind::ConflictsWith => "conflicts-with",
            RelationshipKind::Other(label) => label,
        }
    }
}

impl From<String> for RelationshipKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "supersedes" => RelationshipKind::Supersedes,
            "related-to" | "related_to" => RelationshipKind::RelatedTo,
            "depends-on" | "depends_on" => RelationshipKind::DependsOn,
            "conflicts-with" | "conflicts_with" => RelationshipKind::ConflictsWith,
            _ => RelationshipKind::Other(s),
        }
    }
}

impl From<&str> for RelationshipKind {
    fn from(s: &str) -> Self {
        RelationshipKind::from(s.to_string())
    }
}

impl From<RelationshipKind> for String {
    fn from(kind: RelationshipKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edges of a pattern to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Edges pointing at the pattern
    In,
    /// Edges leaving the pattern
    Out,
    #[default]
    Both,
}

/// A stored edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationshipKind,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One node reached by [`RelationshipManager::traverse`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalStep {
    pub pattern_id: String,
    pub depth: usize,
    /// Node this one was reached from (`None` for the start node)
    pub via: Option<String>,
    pub kind: Option<RelationshipKind>,
}

/// Directed edge bookkeeping
#[derive(Clone)]
pub struct RelationshipManager {
    db: Arc<Database>,
}

impl RelationshipManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an edge. Returns false if the same edge already exists.
    pub fn create(
        &self,
        from_id: &str,
        to_id: &str,
        kind: impl Into<RelationshipKind>,
    ) -> Result<bool> {
        if from_id == to_id {
            return Err(Error::validation(format!(
                "pattern {from_id} cannot relate to itself"
            )));
        }
        let kind = normalize_kind(kind.into())?;

        self.db.with_conn(|conn| {
            for id in [from_id, to_id] {
                if !repo::exists(conn, id)? {
                    return Err(Error::NotFound(id.to_string()));
                }
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO pattern_relationships (from_id, to_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![from_id, to_id, kind.as_str(), to_millis(&now_utc())],
            )?;
            debug!(from_id, to_id, %kind, inserted = inserted > 0, "Relationship created");
            Ok(inserted > 0)
        })
    }

    /// Remove an edge. Returns false if it did not exist.
    pub fn remove(
        &self,
        from_id: &str,
        to_id: &str,
        kind: impl Into<RelationshipKind>,
    ) -> Result<bool> {
        let kind = normalize_kind(kind.into())?;
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pattern_relationships WHERE from_id = ?1 AND to_id = ?2 AND kind = ?3",
                params![from_id, to_id, kind.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Edges touching `pattern_id` in the given direction
    pub fn get(&self, pattern_id: &str, direction: Direction) -> Result<Vec<Relationship>> {
        let sql = match direction {
            Direction::Out => {
                "SELECT from_id, to_id, kind, created_at FROM pattern_relationships
                 WHERE from_id = ?1 ORDER BY created_at, to_id, kind"
            }
            Direction::In => {
                "SELECT from_id, to_id, kind, created_at FROM pattern_relationships
                 WHERE to_id = ?1 ORDER BY created_at, from_id, kind"
            }
            Direction::Both => {
                "SELECT from_id, to_id, kind, created_at FROM pattern_relationships
                 WHERE from_id = ?1 OR to_id = ?1 ORDER BY created_at, from_id, to_id, kind"
            }
        };
        self.db.with_reader(|conn| query_edges(conn, sql, pattern_id))
    }

    /// Breadth-first walk along outgoing edges, up to `max_depth` hops.
    ///
    /// Each pattern is visited at most once, so cycles terminate. The start
    /// node is returned at depth 0.
    pub fn traverse(&self, start: &str, max_depth: usize) -> Result<Vec<TraversalStep>> {
        self.db.with_reader(|conn| {
            if !repo::exists(conn, start)? {
                return Err(Error::NotFound(start.to_string()));
            }

            let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
            let mut steps = vec![TraversalStep {
                pattern_id: start.to_string(),
                depth: 0,
                via: None,
                kind: None,
            }];
            let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start.to_string(), 0)]);

            let mut stmt = conn.prepare(
                "SELECT to_id, kind FROM pattern_relationships
                 WHERE from_id = ?1 ORDER BY to_id, kind",
            )?;
            while let Some((current, depth)) = queue.pop_front() {
                if depth >= max_depth {
                    continue;
                }
                let neighbours = stmt
                    .query_map(params![current], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for (next, kind) in neighbours {
                    if !visited.insert(next.clone()) {
                        continue;
                    }
                    steps.push(TraversalStep {
                        pattern_id: next.clone(),
                        depth: depth + 1,
                        via: Some(current.clone()),
                        kind: Some(RelationshipKind::from(kind)),
                    });
                    queue.push_back((next, depth + 1));
                }
            }
            Ok(steps)
        })
    }
}

fn normalize_kind(kind: RelationshipKind) -> Result<RelationshipKind> {
    match kind {
        RelationshipKind::Other(label) => Ok(RelationshipKind::from(normalize_tag(&label)?)),
        known => Ok(known),
    }
}

fn query_edges(conn: &Connection, sql: &str, pattern_id: &str) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(sql)?;
    let edges = stmt
        .query_map(params![pattern_id], |row| {
            Ok(Relationship {
                from_id: row.get(0)?,
                to_id: row.get(1)?,
                kind: RelationshipKind::from(row.get::<_, String>(2)?),
                created_at: from_millis(row.get(3)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternStore;
    use crate::types::NewPattern;

    fn setup(ids: &[&str]) -> (PatternStore, RelationshipManager) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = PatternStore::new(db.clone());
        for id in ids {
            store.store(NewPattern::new(*id, *id, "fact").with_id(*id)).unwrap();
        }
        (store, RelationshipManager::new(db))
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(RelationshipKind::from("related-to"), RelationshipKind::RelatedTo);
        assert_eq!(RelationshipKind::DependsOn.as_str(), "depends-on");
        assert_eq!(
            normalize_kind(RelationshipKind::from("Inspired By")).unwrap(),
            RelationshipKind::Other("inspired-by".into())
        );
        assert_eq!(
            normalize_kind(RelationshipKind::from("Supersedes!")).unwrap(),
            RelationshipKind::Supersedes
        );
    }

    #[test]
    fn test_create_and_get() {
        let (_, rels) = setup(&["a", "b", "c"]);
        assert!(rels.create("a", "b", RelationshipKind::Supersedes).unwrap());
        assert!(!rels.create("a", "b", "supersedes").unwrap());
        assert!(rels.create("c", "a", "related-to").unwrap());

        assert_eq!(rels.get("a", Direction::Out).unwrap().len(), 1);
        assert_eq!(rels.get("a", Direction::In).unwrap().len(), 1);
        assert_eq!(rels.get("a", Direction::Both).unwrap().len(), 2);

        let incoming = rels.get("a", Direction::In).unwrap();
        assert_eq!(incoming[0].from_id, "c");
        assert_eq!(incoming[0].kind, RelationshipKind::RelatedTo);

        assert!(rels.remove("a", "b", "supersedes").unwrap());
        assert!(!rels.remove("a", "b", "supersedes").unwrap());
    }

    #[test]
    fn test_create_rejects_bad_edges() {
        let (_, rels) = setup(&["a"]);
        assert!(matches!(rels.create("a", "a", "related-to"), Err(Error::Validation(_))));
        assert!(rels.create("a", "ghost", "related-to").unwrap_err().is_not_found());
    }

    #[test]
    fn test_traverse_terminates_on_cycles() {
        let (_, rels) = setup(&["a", "b", "c", "d"]);
        rels.create("a", "b", "depends-on").unwrap();
        rels.create("b", "c", "depends-on").unwrap();
        rels.create("c", "a", "depends-on").unwrap();
        rels.create("c", "d", "related-to").unwrap();

        let steps = rels.traverse("a", 10).unwrap();
        let ids: Vec<&str> = steps.iter().map(|s| s.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(steps[3].depth, 3);
        assert_eq!(steps[3].via.as_deref(), Some("c"));

        let shallow = rels.traverse("a", 1).unwrap();
        assert_eq!(shallow.len(), 2);

        assert_eq!(rels.traverse("a", 0).unwrap().len(), 1);
        assert!(rels.traverse("ghost", 3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_edges_removed_with_pattern() {
        let (store, rels) = setup(&["a", "b"]);
        rels.create("a", "b", "related-to").unwrap();
        store.delete("b").unwrap();
        assert!(rels.get("a", Direction::Both).unwrap().is_empty());
    }
}
