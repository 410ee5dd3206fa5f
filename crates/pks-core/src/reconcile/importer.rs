//! Brain Importer: applies an external bundle to the local store.
//!
//! The bundle is validated and its signature checked before anything is
//! touched. Ids not present locally are inserted; ids present on both sides
//! are resolved by the chosen [`ConflictStrategy`]. The whole import runs in
//! one transaction, and the bundle file is moved afterwards so it is never
//! processed twice: to `applied/` with a decision log on success, to
//! `rejected/` with an error log on failure.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bundle::ExportBundle;
use crate::config::ReconcileConfig;
use crate::consolidation::merge_patterns;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::patterns::repo;
use crate::tags::{insert_tag, normalize_tag};
use crate::types::{Metadata, Pattern};
use crate::utils::now_utc;

/// How id conflicts between local and imported patterns are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Similarity-based resolution with a trust-local bias
    #[default]
    Auto,
    /// Imported pattern wins
    Replace,
    /// Local pattern wins
    Skip,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Auto => write!(f, "auto"),
            ConflictStrategy::Replace => write!(f, "replace"),
            ConflictStrategy::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ConflictStrategy::Auto),
            "replace" => Ok(ConflictStrategy::Replace),
            "skip" => Ok(ConflictStrategy::Skip),
            other => Err(Error::validation(format!("unknown conflict strategy: {other}"))),
        }
    }
}

/// Outcome for one imported pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Id was new locally
    Inserted,
    /// `replace` strategy: imported copy overwrote local
    Replaced,
    /// `skip` strategy: local copy kept
    Skipped,
    /// Near-identical, local confidence at least as high
    KeepLocal,
    /// Near-identical, imported confidence higher
    KeepImported,
    /// Similar enough to merge
    WeightedMerge,
    /// Too different; local wins
    ContradictionKeepLocal,
    /// Local pattern is protected and is never overwritten
    ProtectedLocal,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Inserted => "inserted",
            Resolution::Replaced => "replaced",
            Resolution::Skipped => "skipped",
            Resolution::KeepLocal => "keep_local",
            Resolution::KeepImported => "keep_imported",
            Resolution::WeightedMerge => "weighted_merge",
            Resolution::ContradictionKeepLocal => "contradiction_keep_local",
            Resolution::ProtectedLocal => "protected_local",
        }
    }

    /// Whether the imported data lands in the store
    fn applies_import(&self) -> bool {
        matches!(
            self,
            Resolution::Inserted
                | Resolution::Replaced
                | Resolution::KeepImported
                | Resolution::WeightedMerge
        )
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of how one pattern was handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub pattern_id: String,
    pub resolution: Resolution,
    pub reason: String,
    /// Reconciliation similarity, when the auto strategy computed one
    pub similarity: Option<f64>,
    /// Local confidence before the import (`None` for new patterns)
    pub confidence_before: Option<f64>,
    pub confidence_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Dry-run view of one conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPreview {
    pub pattern_id: String,
    pub local_confidence: f64,
    pub imported_confidence: f64,
    pub similarity: f64,
    pub recommended: Resolution,
}

/// Options for one import
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    /// Conflict strategy; `None` uses the configured default
    pub strategy: Option<ConflictStrategy>,
}

/// Outcome of an import. Failures are reported here rather than as `Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub bundle: PathBuf,
    pub success: bool,
    pub dry_run: bool,
    pub source_machine_id: Option<String>,
    pub new_patterns: usize,
    pub conflicts: usize,
    pub decisions: Vec<MergeDecision>,
    pub previews: Vec<ConflictPreview>,
    pub errors: Vec<String>,
    /// Where the bundle file was moved, if it was
    pub moved_to: Option<PathBuf>,
}

impl ImportReport {
    fn failed(bundle: &Path, dry_run: bool, error: String) -> Self {
        Self {
            bundle: bundle.to_path_buf(),
            dry_run,
            errors: vec![error],
            ..Default::default()
        }
    }

    /// Decisions with the given resolution
    pub fn count(&self, resolution: Resolution) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.resolution == resolution)
            .count()
    }
}

/// Structural/confidence similarity between two copies of one pattern.
///
/// `0.7 · jaccard(metadata keys) + 0.3 · (1 − |Δconfidence|)`. Two empty key
/// sets count as identical context. Unrelated to the content-word similarity
/// used by consolidation.
pub fn reconciliation_similarity(local: &Pattern, imported: &Pattern) -> f64 {
    let context = key_jaccard(&local.metadata, &imported.metadata);
    let confidence = 1.0 - (local.confidence - imported.confidence).abs();
    0.7 * context + 0.3 * confidence
}

fn key_jaccard(a: &Metadata, b: &Metadata) -> f64 {
    let a: HashSet<&String> = a.keys().collect();
    let b: HashSet<&String> = b.keys().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

struct Outcome {
    resolution: Resolution,
    reason: String,
    similarity: Option<f64>,
    /// Record to persist, if the local row changes
    write: Option<Pattern>,
}

/// Applies bundles to one store
#[derive(Clone)]
pub struct BrainImporter {
    db: Arc<Database>,
    config: ReconcileConfig,
}

impl BrainImporter {
    pub fn new(db: Arc<Database>, config: ReconcileConfig) -> Self {
        Self { db, config }
    }

    /// Import the bundle at `path`.
    ///
    /// Returns `Err` only for faults outside the bundle itself (for example
    /// when the bundle cannot be moved after a rejection). A dry run never
    /// mutates the store or moves the file.
    pub fn import(&self, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let strategy = match options.strategy {
            Some(strategy) => strategy,
            None => self.config.strategy()?,
        };

        let _guard = match self.db.begin_maintenance("import") {
            Ok(guard) => guard,
            Err(e @ Error::MaintenanceBusy { .. }) => {
                warn!(bundle = %path.display(), error = %e, "Import skipped");
                return Ok(ImportReport::failed(path, options.dry_run, e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let bundle = match ExportBundle::read(path).and_then(|b| b.verify().map(|_| b)) {
            Ok(bundle) => bundle,
            Err(e) => return self.reject(path, options.dry_run, e),
        };

        if options.dry_run {
            return self.preview(path, &bundle, strategy);
        }

        let now = now_utc();
        let outcome = self.db.transaction(|tx| {
            let mut decisions = Vec::with_capacity(bundle.patterns.len());
            for (id, bundled) in &bundle.patterns {
                let imported = bundled.to_pattern(id, now);
                let decision = match repo::fetch(tx, id)? {
                    None => {
                        repo::insert(tx, &imported)?;
                        MergeDecision {
                            pattern_id: id.clone(),
                            resolution: Resolution::Inserted,
                            reason: "new pattern".to_string(),
                            similarity: None,
                            confidence_before: None,
                            confidence_after: imported.confidence,
                            timestamp: now,
                        }
                    }
                    Some(local) => {
                        let outcome = self.resolve(&local, &imported, strategy, &bundle);
                        let confidence_after = match &outcome.write {
                            Some(pattern) => {
                                repo::save(tx, pattern)?;
                                pattern.confidence
                            }
                            None => local.confidence,
                        };
                        MergeDecision {
                            pattern_id: id.clone(),
                            resolution: outcome.resolution,
                            reason: outcome.reason,
                            similarity: outcome.similarity,
                            confidence_before: Some(local.confidence),
                            confidence_after,
                            timestamp: now,
                        }
                    }
                };

                if decision.resolution.applies_import() {
                    attach_tags(tx, id, &bundled.tags)?;
                }
                debug!(id, resolution = %decision.resolution, "Import decision");
                decisions.push(decision);
            }
            Ok(decisions)
        });

        let decisions = match outcome {
            Ok(decisions) => decisions,
            Err(e) => return self.reject(path, false, e),
        };

        let mut report = ImportReport {
            bundle: path.to_path_buf(),
            success: true,
            source_machine_id: Some(bundle.source_machine_id.clone()),
            new_patterns: decisions
                .iter()
                .filter(|d| d.resolution == Resolution::Inserted)
                .count(),
            ..Default::default()
        };
        report.conflicts = decisions.len() - report.new_patterns;
        report.decisions = decisions;

        match self.archive(path, &bundle, &report.decisions) {
            Ok(moved_to) => report.moved_to = Some(moved_to),
            Err(e) => {
                warn!(
                    bundle = %path.display(),
                    error = %e,
                    "Imported bundle could not be archived"
                );
                report.errors.push(format!("failed to archive bundle: {e}"));
            }
        }

        info!(
            bundle = %path.display(),
            source = %bundle.source_machine_id,
            new = report.new_patterns,
            conflicts = report.conflicts,
            "Bundle imported"
        );
        Ok(report)
    }

    fn preview(
        &self,
        path: &Path,
        bundle: &ExportBundle,
        strategy: ConflictStrategy,
    ) -> Result<ImportReport> {
        let now = now_utc();
        let mut report = ImportReport {
            bundle: path.to_path_buf(),
            success: true,
            dry_run: true,
            source_machine_id: Some(bundle.source_machine_id.clone()),
            ..Default::default()
        };

        self.db.with_reader(|conn| {
            for (id, bundled) in &bundle.patterns {
                let Some(local) = repo::fetch(conn, id)? else {
                    report.new_patterns += 1;
                    continue;
                };
                let imported = bundled.to_pattern(id, now);
                let outcome = self.resolve(&local, &imported, strategy, bundle);
                report.previews.push(ConflictPreview {
                    pattern_id: id.clone(),
                    local_confidence: local.confidence,
                    imported_confidence: imported.confidence,
                    similarity: reconciliation_similarity(&local, &imported),
                    recommended: outcome.resolution,
                });
            }
            Ok(())
        })?;

        report.conflicts = report.previews.len();
        info!(
            bundle = %path.display(),
            new = report.new_patterns,
            conflicts = report.conflicts,
            "Import dry run complete"
        );
        Ok(report)
    }

    fn resolve(
        &self,
        local: &Pattern,
        imported: &Pattern,
        strategy: ConflictStrategy,
        bundle: &ExportBundle,
    ) -> Outcome {
        if local.is_protected() {
            return Outcome {
                resolution: Resolution::ProtectedLocal,
                reason: "local pattern is protected".to_string(),
                similarity: None,
                write: None,
            };
        }

        match strategy {
            ConflictStrategy::Replace => Outcome {
                resolution: Resolution::Replaced,
                reason: "replace strategy".to_string(),
                similarity: None,
                write: Some(keep_pin(local, imported)),
            },
            ConflictStrategy::Skip => Outcome {
                resolution: Resolution::Skipped,
                reason: "skip strategy".to_string(),
                similarity: None,
                write: None,
            },
            ConflictStrategy::Auto => {
                let similarity = reconciliation_similarity(local, imported);
                if similarity > self.config.near_identical_threshold {
                    if imported.confidence > local.confidence {
                        Outcome {
                            resolution: Resolution::KeepImported,
                            reason: format!(
                                "near-identical ({similarity:.3}), imported confidence higher"
                            ),
                            similarity: Some(similarity),
                            write: Some(keep_pin(local, imported)),
                        }
                    } else {
                        Outcome {
                            resolution: Resolution::KeepLocal,
                            reason: format!(
                                "near-identical ({similarity:.3}), \
                                 local confidence at least as high"
                            ),
                            similarity: Some(similarity),
                            write: None,
                        }
                    }
                } else if similarity > self.config.merge_threshold {
                    let marker = format!("import:{}", bundle.source_machine_id);
                    Outcome {
                        resolution: Resolution::WeightedMerge,
                        reason: format!("similar ({similarity:.3}), merged"),
                        similarity: Some(similarity),
                        write: Some(merge_patterns(local, imported, &marker)),
                    }
                } else {
                    Outcome {
                        resolution: Resolution::ContradictionKeepLocal,
                        reason: format!("contradictory ({similarity:.3}), local kept"),
                        similarity: Some(similarity),
                        write: None,
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bundle file bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    fn applied_dir(&self, bundle: &Path) -> PathBuf {
        self.config
            .applied_dir
            .clone()
            .unwrap_or_else(|| bundle_parent(bundle).join("applied"))
    }

    fn rejected_dir(&self, bundle: &Path) -> PathBuf {
        self.config
            .rejected_dir
            .clone()
            .unwrap_or_else(|| bundle_parent(bundle).join("rejected"))
    }

    /// Report a rejected bundle, moving it aside unless this is a dry run
    fn reject(&self, path: &Path, dry_run: bool, error: Error) -> Result<ImportReport> {
        warn!(bundle = %path.display(), error = %error, "Bundle rejected");
        let mut report = ImportReport::failed(path, dry_run, error.to_string());
        if dry_run || !path.exists() {
            return Ok(report);
        }

        let dir = self.rejected_dir(path);
        let moved_to = relocate(path, &dir)?;
        let mut log = String::new();
        log.push_str(&format!(
            "# Rejected {} at {}\n",
            file_name(path),
            now_utc().to_rfc3339()
        ));
        for err in &report.errors {
            log.push_str(err);
            log.push('\n');
        }
        append_log(&dir.join(format!("{}.errors.log", file_name(&moved_to))), &log)?;

        report.moved_to = Some(moved_to);
        Ok(report)
    }

    fn archive(
        &self,
        path: &Path,
        bundle: &ExportBundle,
        decisions: &[MergeDecision],
    ) -> Result<PathBuf> {
        let dir = self.applied_dir(path);
        let moved_to = relocate(path, &dir)?;

        let mut log = format!(
            "# Imported {} from {} at {}\n",
            file_name(path),
            bundle.source_machine_id,
            now_utc().to_rfc3339()
        );
        for decision in decisions {
            log.push_str(&format_decision(decision));
            log.push('\n');
        }
        append_log(&dir.join(format!("{}.decisions.log", file_name(&moved_to))), &log)?;
        Ok(moved_to)
    }
}

/// Imported copy that keeps the local pin state
fn keep_pin(local: &Pattern, imported: &Pattern) -> Pattern {
    Pattern {
        is_pinned: local.is_pinned,
        ..imported.clone()
    }
}

fn attach_tags(conn: &Connection, pattern_id: &str, tags: &[String]) -> Result<()> {
    for tag in tags {
        match normalize_tag(tag) {
            Ok(tag) => {
                insert_tag(conn, pattern_id, &tag)?;
            }
            Err(e) => debug!(pattern_id, error = %e, "Skipping imported tag"),
        }
    }
    Ok(())
}

fn format_decision(decision: &MergeDecision) -> String {
    let similarity = decision
        .similarity
        .map(|s| format!("{s:.3}"))
        .unwrap_or_else(|| "-".to_string());
    let before = decision
        .confidence_before
        .map(|c| format!("{c:.3}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} {} similarity={} confidence={}->{:.3} {}",
        decision.timestamp.to_rfc3339(),
        decision.pattern_id,
        decision.resolution,
        similarity,
        before,
        decision.confidence_after,
        decision.reason
    )
}

fn bundle_parent(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string())
}

/// Move `path` into `dir`, adding a timestamp suffix if the name is taken
fn relocate(path: &Path, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let mut target = dir.join(file_name(path));
    if target.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string());
        let suffix = now_utc().format("%Y%m%dT%H%M%S%3f");
        let name = match path.extension() {
            Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}-{suffix}"),
        };
        target = dir.join(name);
    }

    if std::fs::rename(path, &target).is_err() {
        std::fs::copy(path, &target)?;
        std::fs::remove_file(path)?;
    }
    Ok(target)
}

fn append_log(path: &Path, text: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}
