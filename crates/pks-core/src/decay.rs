//! Pattern Decay
//!
//! Confidence erosion for application patterns that have not been used for a
//! while. A sweep runs in two phases inside a single transaction:
//!
//! 1. patterns already below the minimum confidence are deleted
//! 2. patterns inactive for longer than the threshold lose `decay_rate` per
//!    extra day; those that fall below the minimum are deleted, the rest are
//!    updated
//!
//! Pinned and protected patterns are never candidates. Every change is written
//! to `decay_log` before the transaction commits. A failure anywhere rolls back
//! the whole sweep and is reported in [`DecayStats`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DecayConfig;
use crate::db::Database;
use crate::error::Result;
use crate::patterns::repo::{self, PATTERN_COLUMNS};
use crate::patterns::set_pinned_with;
use crate::types::{clamp_confidence, DecayLogEntry, Pattern, WriteAccess};
use crate::utils::{days_between, from_millis, now_utc, to_millis};

pub const REASON_ALREADY_BELOW_MINIMUM: &str = "already below minimum";
pub const REASON_AUTO_DECAYED: &str = "auto-decayed";

/// Outcome of one decay sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayStats {
    /// Decayable patterns examined
    pub scanned: usize,
    /// Patterns whose confidence was lowered
    pub decayed: usize,
    /// Patterns deleted (below minimum before or after decay)
    pub deleted: usize,
    pub errors: Vec<String>,
    /// True when the sweep failed and nothing was applied
    pub rolled_back: bool,
}

/// What a sweep would do to a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayAction {
    Decay,
    Delete,
}

/// Preview row returned by [`PatternDecay::get_decay_candidates`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayCandidate {
    pub pattern_id: String,
    pub title: String,
    pub confidence: f64,
    pub days_inactive: i64,
    pub projected_confidence: f64,
    pub action: DecayAction,
}

/// Filters for reading the audit trail
#[derive(Debug, Clone, Default)]
pub struct DecayLogFilter {
    pub pattern_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

struct Plan {
    action: DecayAction,
    new_confidence: f64,
    reason: String,
    days_inactive: i64,
}

/// Scheduled confidence erosion
#[derive(Clone)]
pub struct PatternDecay {
    db: Arc<Database>,
    config: DecayConfig,
}

impl PatternDecay {
    pub fn new(db: Arc<Database>, config: DecayConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Run one sweep against the current time
    pub fn apply_decay(&self) -> Result<DecayStats> {
        self.apply_decay_at(now_utc())
    }

    /// Run one sweep as if the current time were `now`.
    ///
    /// Returns `Err` only when the maintenance lock is held by another job.
    /// Failures inside the sweep come back as `rolled_back` statistics.
    pub fn apply_decay_at(&self, now: DateTime<Utc>) -> Result<DecayStats> {
        let _guard = self.db.begin_maintenance("decay")?;

        let outcome = self.db.transaction(|tx| {
            let mut stats = DecayStats::default();
            let patterns = load_decayable(tx)?;
            stats.scanned = patterns.len();

            // Phase 1 runs over every row before any decay is computed.
            let (below, remaining): (Vec<Pattern>, Vec<Pattern>) = patterns
                .into_iter()
                .partition(|p| p.confidence < self.config.min_confidence);

            for pattern in &below {
                write_log(
                    tx,
                    &pattern.id,
                    pattern.confidence,
                    pattern.confidence,
                    REASON_ALREADY_BELOW_MINIMUM,
                    &now,
                )?;
                repo::remove(tx, &pattern.id)?;
                stats.deleted += 1;
            }

            for pattern in &remaining {
                let Some(plan) = self.plan(pattern, &now) else {
                    continue;
                };
                write_log(
                    tx,
                    &pattern.id,
                    pattern.confidence,
                    plan.new_confidence,
                    &plan.reason,
                    &now,
                )?;
                match plan.action {
                    DecayAction::Delete => {
                        repo::remove(tx, &pattern.id)?;
                        stats.deleted += 1;
                    }
                    DecayAction::Decay => {
                        repo::set_confidence(tx, &pattern.id, plan.new_confidence)?;
                        stats.decayed += 1;
                    }
                }
                debug!(
                    id = %pattern.id,
                    old = pattern.confidence,
                    new = plan.new_confidence,
                    days_inactive = plan.days_inactive,
                    "Decay applied"
                );
            }

            Ok(stats)
        });

        match outcome {
            Ok(stats) => {
                info!(
                    scanned = stats.scanned,
                    decayed = stats.decayed,
                    deleted = stats.deleted,
                    "Decay sweep complete"
                );
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "Decay sweep rolled back");
                Ok(DecayStats {
                    errors: vec![e.to_string()],
                    rolled_back: true,
                    ..Default::default()
                })
            }
        }
    }

    /// Preview what a sweep would do now, without mutating anything
    pub fn get_decay_candidates(&self) -> Result<Vec<DecayCandidate>> {
        self.get_decay_candidates_at(now_utc())
    }

    /// Preview what a sweep at `now` would do
    pub fn get_decay_candidates_at(&self, now: DateTime<Utc>) -> Result<Vec<DecayCandidate>> {
        let patterns = self.db.with_reader(load_decayable)?;

        let mut candidates = Vec::new();
        for pattern in patterns {
            let days_inactive = days_between(&pattern.last_accessed, &now);
            let plan = if pattern.confidence < self.config.min_confidence {
                Some(Plan {
                    action: DecayAction::Delete,
                    new_confidence: pattern.confidence,
                    reason: REASON_ALREADY_BELOW_MINIMUM.to_string(),
                    days_inactive,
                })
            } else {
                self.plan(&pattern, &now)
            };

            if let Some(plan) = plan {
                candidates.push(DecayCandidate {
                    pattern_id: pattern.id,
                    title: pattern.title,
                    confidence: pattern.confidence,
                    days_inactive: plan.days_inactive,
                    projected_confidence: plan.new_confidence,
                    action: plan.action,
                });
            }
        }
        Ok(candidates)
    }

    /// Exempt a pattern from decay
    pub fn pin(&self, pattern_id: &str) -> Result<bool> {
        self.db.transaction(|tx| set_pinned_with(tx, pattern_id, true, WriteAccess::Standard))
    }

    /// Make a pattern decayable again
    pub fn unpin(&self, pattern_id: &str) -> Result<bool> {
        self.db.transaction(|tx| set_pinned_with(tx, pattern_id, false, WriteAccess::Standard))
    }

    /// Read the audit trail, newest first
    pub fn get_decay_log(&self, filter: &DecayLogFilter) -> Result<Vec<DecayLogEntry>> {
        self.db.with_reader(|conn| {
            let mut sql = String::from(
                "SELECT id, pattern_id, old_confidence, new_confidence, reason, timestamp
                 FROM decay_log WHERE 1=1",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref pattern_id) = filter.pattern_id {
                sql.push_str(" AND pattern_id = ?");
                params_vec.push(Box::new(pattern_id.clone()));
            }

            if let Some(since) = filter.since {
                sql.push_str(" AND timestamp >= ?");
                params_vec.push(Box::new(to_millis(&since)));
            }

            sql.push_str(" ORDER BY timestamp DESC, id DESC");

            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok(DecayLogEntry {
                        id: row.get(0)?,
                        pattern_id: row.get(1)?,
                        old_confidence: row.get(2)?,
                        new_confidence: row.get(3)?,
                        reason: row.get(4)?,
                        timestamp: from_millis(row.get(5)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    /// Delete patterns unused for more than `days` whose confidence is below
    /// the minimum. Pinned patterns are never deleted; protected ones are
    /// skipped when `protect_protected` is set.
    pub fn remove_stale(&self, days: i64, protect_protected: bool) -> Result<usize> {
        self.remove_stale_at(days, protect_protected, now_utc())
    }

    /// [`remove_stale`](Self::remove_stale) evaluated at `now`
    pub fn remove_stale_at(
        &self,
        days: i64,
        protect_protected: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let _guard = self.db.begin_maintenance("remove_stale")?;
        let cutoff = now - Duration::days(days.max(0));

        let removed = self.db.transaction(|tx| {
            let sql = format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns p
                 WHERE p.is_pinned = 0 AND p.last_accessed < ?1 AND p.confidence < ?2
                 ORDER BY p.id"
            );
            let mut stmt = tx.prepare(&sql)?;
            let stale = stmt
                .query_map(
                    params![to_millis(&cutoff), self.config.min_confidence],
                    repo::map_pattern,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut removed = 0;
            for pattern in stale {
                if protect_protected && pattern.is_protected() {
                    continue;
                }
                let days_inactive = days_between(&pattern.last_accessed, &now);
                write_log(
                    tx,
                    &pattern.id,
                    pattern.confidence,
                    pattern.confidence,
                    &format!("stale ({days_inactive} days inactive)"),
                    &now,
                )?;
                repo::remove(tx, &pattern.id)?;
                removed += 1;
            }
            Ok(removed)
        })?;

        info!(removed, days, "Stale patterns removed");
        Ok(removed)
    }

    /// Phase-two decision for a pattern at or above the minimum
    fn plan(&self, pattern: &Pattern, now: &DateTime<Utc>) -> Option<Plan> {
        let days_inactive = days_between(&pattern.last_accessed, now);
        if days_inactive <= self.config.decay_threshold_days {
            return None;
        }

        let overdue = days_inactive - self.config.decay_threshold_days;
        let decay = self.config.decay_rate * overdue as f64;
        let new_confidence = clamp_confidence((pattern.confidence - decay).max(0.0));

        if new_confidence < self.config.min_confidence {
            Some(Plan {
                action: DecayAction::Delete,
                new_confidence,
                reason: format!("decayed below minimum ({days_inactive} days inactive)"),
                days_inactive,
            })
        } else {
            Some(Plan {
                action: DecayAction::Decay,
                new_confidence,
                reason: REASON_AUTO_DECAYED.to_string(),
                days_inactive,
            })
        }
    }
}

/// Every pattern decay may touch, evaluated with the shared protection predicate
fn load_decayable(conn: &Connection) -> Result<Vec<Pattern>> {
    let sql = format!(
        "SELECT {PATTERN_COLUMNS} FROM patterns p WHERE p.is_pinned = 0 ORDER BY p.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let patterns = stmt
        .query_map([], repo::map_pattern)?
        .collect::<std::result::Result<Vec<Pattern>, _>>()?;
    Ok(patterns.into_iter().filter(Pattern::is_decayable).collect())
}

fn write_log(
    conn: &Connection,
    pattern_id: &str,
    old_confidence: f64,
    new_confidence: f64,
    reason: &str,
    at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO decay_log (pattern_id, old_confidence, new_confidence, reason, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![pattern_id, old_confidence, new_confidence, reason, to_millis(at)],
    )?;
    Ok(())
}
