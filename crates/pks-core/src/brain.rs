//! Facade over every component.
//!
//! `Brain` owns one [`Database`] handle and injects it into each component,
//! so callers never juggle connections. Components stay reachable through
//! accessors for operations the facade does not wrap.

use std::path::Path;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::consolidation::{ConsolidateOptions, ConsolidationStats, PatternConsolidator};
use crate::db::{Database, HealthReport};
use crate::decay::{DecayStats, PatternDecay};
use crate::error::Result;
use crate::patterns::PatternStore;
use crate::reconcile::{
    BrainExporter, BrainImporter, ExportBundle, ExportOptions, ImportOptions, ImportReport,
};
use crate::relationships::RelationshipManager;
use crate::search::{PatternSearch, SearchFilters};
use crate::tags::TagManager;
use crate::types::{NewPattern, Pattern, PatternFilter, PatternUpdate, StoreStats};

/// One pattern knowledge store
pub struct Brain {
    db: Arc<Database>,
    config: StoreConfig,
    patterns: PatternStore,
    search: PatternSearch,
    tags: TagManager,
    relationships: RelationshipManager,
    decay: PatternDecay,
    consolidator: PatternConsolidator,
    importer: BrainImporter,
    exporter: BrainExporter,
}

impl Brain {
    /// Open the store described by `config`, creating it if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open_path(&config.database_path)?;
        Ok(Self::with_database(Arc::new(db), config.clone()))
    }

    /// Private in-memory store with default configuration
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_database(
            Arc::new(Database::open_in_memory()?),
            StoreConfig::default(),
        ))
    }

    /// Build every component over an existing handle
    pub fn with_database(db: Arc<Database>, config: StoreConfig) -> Self {
        Self {
            patterns: PatternStore::new(db.clone()),
            search: PatternSearch::new(db.clone()),
            tags: TagManager::new(db.clone()),
            relationships: RelationshipManager::new(db.clone()),
            decay: PatternDecay::new(db.clone(), config.decay.clone()),
            consolidator: PatternConsolidator::new(db.clone(), config.consolidation.clone()),
            importer: BrainImporter::new(db.clone(), config.reconcile.clone()),
            exporter: BrainExporter::new(db.clone(), config.machine_id.clone()),
            db,
            config,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Component access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn searcher(&self) -> &PatternSearch {
        &self.search
    }

    pub fn tags(&self) -> &TagManager {
        &self.tags
    }

    pub fn relationships(&self) -> &RelationshipManager {
        &self.relationships
    }

    pub fn decay(&self) -> &PatternDecay {
        &self.decay
    }

    pub fn consolidator(&self) -> &PatternConsolidator {
        &self.consolidator
    }

    pub fn importer(&self) -> &BrainImporter {
        &self.importer
    }

    pub fn exporter(&self) -> &BrainExporter {
        &self.exporter
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer surface
    // ─────────────────────────────────────────────────────────────────────────

    pub fn store(&self, pattern: NewPattern) -> Result<Pattern> {
        self.patterns.store(pattern)
    }

    pub fn get(&self, id: &str) -> Result<Option<Pattern>> {
        self.patterns.get(id)
    }

    pub fn update(&self, id: &str, update: &PatternUpdate) -> Result<bool> {
        self.patterns.update(id, update)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.patterns.delete(id)
    }

    pub fn list(&self, filter: &PatternFilter) -> Result<Vec<Pattern>> {
        self.patterns.list(filter)
    }

    /// Ranked search; `limit` defaults to the configured search limit
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<Pattern>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        self.search.search(query, filters, limit)
    }

    pub fn apply_decay(&self) -> Result<DecayStats> {
        self.decay.apply_decay()
    }

    pub fn consolidate(&self, options: &ConsolidateOptions) -> Result<ConsolidationStats> {
        self.consolidator.consolidate(options)
    }

    /// Apply a bundle; without an explicit strategy the configured
    /// `reconcile.default_strategy` decides conflicts
    pub fn import(&self, bundle: &Path, options: &ImportOptions) -> Result<ImportReport> {
        self.importer.import(bundle, options)
    }

    pub fn export(&self, path: &Path, options: &ExportOptions) -> Result<ExportBundle> {
        self.exporter.export(path, options)
    }

    pub fn pin(&self, id: &str) -> Result<bool> {
        self.patterns.pin(id)
    }

    pub fn unpin(&self, id: &str) -> Result<bool> {
        self.patterns.unpin(id)
    }

    pub fn health_check(&self) -> HealthReport {
        self.db.health_check()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.patterns.stats()
    }
}
