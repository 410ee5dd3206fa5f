//! Bundle export.

use chrono::SecondsFormat;
use rusqlite::params;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::bundle::{BundlePattern, ExportBundle};
use crate::db::Database;
use crate::error::Result;
use crate::patterns::repo;
use crate::types::PatternFilter;
use crate::utils::now_utc;

/// Which patterns go into a bundle
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Only export patterns carrying this namespace
    pub namespace: Option<String>,
    /// Also export protected patterns (they still import as application scope)
    pub include_protected: bool,
}

/// Builds signed bundles from the local store
#[derive(Clone)]
pub struct BrainExporter {
    db: Arc<Database>,
    machine_id: String,
}

impl BrainExporter {
    pub fn new(db: Arc<Database>, machine_id: impl Into<String>) -> Self {
        Self {
            db,
            machine_id: machine_id.into(),
        }
    }

    /// Build a signed bundle without writing it
    pub fn build(&self, options: &ExportOptions) -> Result<ExportBundle> {
        let filter = PatternFilter {
            namespace: options.namespace.clone(),
            ..Default::default()
        };

        let patterns = self.db.with_reader(|conn| {
            let mut stmt =
                conn.prepare("SELECT tag FROM pattern_tags WHERE pattern_id = ?1 ORDER BY tag")?;
            let mut bundled = BTreeMap::new();
            for pattern in repo::list(conn, &filter)? {
                if pattern.is_protected() && !options.include_protected {
                    continue;
                }
                let tags = stmt
                    .query_map(params![pattern.id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                bundled.insert(pattern.id.clone(), BundlePattern::from_pattern(&pattern, tags));
            }
            Ok(bundled)
        })?;

        let export_date = now_utc().to_rfc3339_opts(SecondsFormat::Secs, true);
        ExportBundle::new(export_date, self.machine_id.clone(), patterns)
    }

    /// Build a signed bundle and write it to `path`
    pub fn export(&self, path: &Path, options: &ExportOptions) -> Result<ExportBundle> {
        let bundle = self.build(options)?;
        bundle.write(path)?;
        info!(
            path = %path.display(),
            patterns = bundle.total_patterns,
            "Bundle exported"
        );
        Ok(bundle)
    }
}
