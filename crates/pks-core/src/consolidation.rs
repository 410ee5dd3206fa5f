//! Pattern Consolidator
//!
//! Merges near-duplicate application patterns of the same type. Each type
//! bucket is sorted by priority (confidence desc, then oldest first) and every
//! unconsumed pair is compared, so a sweep is `O(n²)` per bucket. That is fine
//! for hundreds of patterns per type; it is not meant for millions.
//!
//! [`merge_patterns`] is the merge primitive shared with bundle reconciliation.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConsolidationConfig;
use crate::db::Database;
use crate::error::Result;
use crate::patterns::repo::{self, PATTERN_COLUMNS};
use crate::tags::copy_tags;
use crate::types::{clamp_confidence, Pattern};

/// Metadata key recording which pattern was absorbed
pub const MERGED_FROM_KEY: &str = "merged_from";

/// Options for one consolidation sweep
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// Only consider patterns carrying this namespace
    pub namespace: Option<String>,
    /// Count merges without applying them
    pub dry_run: bool,
}

/// One merge performed (or planned) by a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub winner_id: String,
    pub loser_id: String,
    pub similarity: f64,
    pub confidence_before: f64,
    pub confidence_after: f64,
}

/// Outcome of one consolidation sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub groups_scanned: usize,
    pub patterns_scanned: usize,
    /// Number of patterns absorbed into another
    pub consolidated_count: usize,
    pub merges: Vec<MergeRecord>,
    pub errors: Vec<String>,
    pub rolled_back: bool,
    pub dry_run: bool,
}

/// Jaccard index over lowercase whitespace tokens of `title + " " + content`.
///
/// Two patterns with no tokens at all score 0.0.
pub fn content_similarity(a: &Pattern, b: &Pattern) -> f64 {
    jaccard(&word_set(a), &word_set(b))
}

fn word_set(pattern: &Pattern) -> HashSet<String> {
    format!("{} {}", pattern.title, pattern.content)
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Fold `loser` into `winner`.
///
/// Confidence is the access-weighted average (max when neither was used),
/// usage counters add up, metadata and namespaces are unioned with the
/// loser's metadata winning on key collisions, and `marker` is recorded under
/// [`MERGED_FROM_KEY`]. Identity, title, content and scope stay the winner's.
pub fn merge_patterns(winner: &Pattern, loser: &Pattern, marker: &str) -> Pattern {
    let (winner_uses, loser_uses) = (winner.access_count.max(0), loser.access_count.max(0));
    let total = winner_uses.saturating_add(loser_uses);

    // Counts may be near i64::MAX
    let (w, l) = (winner_uses as f64, loser_uses as f64);
    let confidence = if w + l > 0.0 {
        (winner.confidence * w + loser.confidence * l) / (w + l)
    } else {
        winner.confidence.max(loser.confidence)
    };

    let mut metadata = winner.metadata.clone();
    for (key, value) in &loser.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    metadata.insert(MERGED_FROM_KEY.to_string(), marker.into());

    let mut namespaces = winner.namespaces.clone();
    namespaces.extend(loser.namespaces.iter().cloned());

    Pattern {
        confidence: clamp_confidence(confidence),
        last_accessed: winner.last_accessed.max(loser.last_accessed),
        access_count: total,
        metadata,
        namespaces,
        is_pinned: winner.is_pinned || loser.is_pinned,
        ..winner.clone()
    }
}

struct Plan {
    winner: Pattern,
    losers: Vec<String>,
}

/// Similarity-based deduplication
#[derive(Clone)]
pub struct PatternConsolidator {
    db: Arc<Database>,
    config: ConsolidationConfig,
}

impl PatternConsolidator {
    pub fn new(db: Arc<Database>, config: ConsolidationConfig) -> Self {
        Self { db, config }
    }

    /// Run one sweep.
    ///
    /// Returns `Err` only when another maintenance job holds the lock.
    pub fn consolidate(&self, options: &ConsolidateOptions) -> Result<ConsolidationStats> {
        let _guard = self.db.begin_maintenance("consolidation")?;

        if options.dry_run {
            let (stats, _) = self
                .db
                .with_reader(|conn| self.plan(conn, options.namespace.as_deref()))?;
            info!(
                consolidated = stats.consolidated_count,
                "Consolidation dry run complete"
            );
            return Ok(ConsolidationStats {
                dry_run: true,
                ..stats
            });
        }

        let outcome = self.db.transaction(|tx| {
            let (stats, plans) = self.plan(tx, options.namespace.as_deref())?;
            for plan in &plans {
                repo::save(tx, &plan.winner)?;
                for loser in &plan.losers {
                    copy_tags(tx, loser, &plan.winner.id)?;
                    repo::remove(tx, loser)?;
                }
            }
            Ok(stats)
        });

        match outcome {
            Ok(stats) => {
                info!(
                    groups = stats.groups_scanned,
                    scanned = stats.patterns_scanned,
                    consolidated = stats.consolidated_count,
                    "Consolidation complete"
                );
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "Consolidation rolled back");
                Ok(ConsolidationStats {
                    errors: vec![e.to_string()],
                    rolled_back: true,
                    ..Default::default()
                })
            }
        }
    }

    fn plan(
        &self,
        conn: &Connection,
        namespace: Option<&str>,
    ) -> Result<(ConsolidationStats, Vec<Plan>)> {
        let buckets = load_buckets(conn, namespace)?;
        let mut stats = ConsolidationStats {
            groups_scanned: buckets.len(),
            ..Default::default()
        };
        let mut plans = Vec::new();

        for (pattern_type, mut bucket) in buckets {
            stats.patterns_scanned += bucket.len();
            bucket.sort_by(|a, b| {
                b.confidence
                    .total_cmp(&a.confidence)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });

            let mut consumed = vec![false; bucket.len()];
            for i in 0..bucket.len() {
                if consumed[i] {
                    continue;
                }
                let mut winner = bucket[i].clone();
                let mut losers = Vec::new();

                for j in (i + 1)..bucket.len() {
                    if consumed[j] {
                        continue;
                    }
                    let loser = &bucket[j];
                    let similarity = content_similarity(&winner, loser);
                    if similarity < self.config.similarity_threshold {
                        continue;
                    }

                    let merged = merge_patterns(&winner, loser, &loser.id);
                    debug!(
                        %pattern_type,
                        winner = %winner.id,
                        loser = %loser.id,
                        similarity,
                        "Merging near-duplicate"
                    );
                    stats.merges.push(MergeRecord {
                        winner_id: winner.id.clone(),
                        loser_id: loser.id.clone(),
                        similarity,
                        confidence_before: winner.confidence,
                        confidence_after: merged.confidence,
                    });
                    consumed[j] = true;
                    losers.push(loser.id.clone());
                    winner = merged;
                }

                if !losers.is_empty() {
                    stats.consolidated_count += losers.len();
                    plans.push(Plan { winner, losers });
                }
            }
        }

        Ok((stats, plans))
    }
}

/// Application patterns that are not protected, grouped by type
fn load_buckets(
    conn: &Connection,
    namespace: Option<&str>,
) -> Result<BTreeMap<String, Vec<Pattern>>> {
    let mut sql = format!("SELECT {PATTERN_COLUMNS} FROM patterns p WHERE p.scope = 'application'");
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(namespace) = namespace {
        sql.push_str(repo::namespace_clause(namespace, &mut params_vec));
    }

    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let patterns = stmt
        .query_map(param_refs.as_slice(), repo::map_pattern)?
        .collect::<std::result::Result<Vec<Pattern>, _>>()?;

    let mut buckets: BTreeMap<String, Vec<Pattern>> = BTreeMap::new();
    for pattern in patterns.into_iter().filter(|p| !p.is_protected()) {
        buckets
            .entry(pattern.pattern_type.as_str().to_string())
            .or_default()
            .push(pattern);
    }
    Ok(buckets)
}
