//! Store Configuration
//!
//! Tunables for decay, consolidation, reconciliation and search. Defaults match
//! the documented constants; a TOML file may override any of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::reconcile::ConflictStrategy;

/// Top-level store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Identifier written into exported bundles
    pub machine_id: String,

    /// Decay configuration
    pub decay: DecayConfig,

    /// Consolidation configuration
    pub consolidation: ConsolidationConfig,

    /// Reconciliation configuration
    pub reconcile: ReconcileConfig,

    /// Search configuration
    pub search: SearchConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            machine_id: "local".to_string(),
            decay: DecayConfig::default(),
            consolidation: ConsolidationConfig::default(),
            reconcile: ReconcileConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

/// Decay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Confidence lost per inactive day past the threshold (default: 0.01)
    pub decay_rate: f64,

    /// Days of inactivity before decay starts (default: 30)
    pub decay_threshold_days: i64,

    /// Patterns below this confidence are deleted (default: 0.3)
    pub min_confidence: f64,

    /// Age used by the stale sweep (default: 90)
    pub stale_threshold_days: i64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.01,
            decay_threshold_days: 30,
            min_confidence: 0.3,
            stale_threshold_days: 90,
        }
    }
}

/// Consolidation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Minimum content similarity for a merge (default: 0.70)
    pub similarity_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.70,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Similarity above which two copies are near-identical (default: 0.98)
    pub near_identical_threshold: f64,

    /// Similarity above which two copies are merged (default: 0.80)
    pub merge_threshold: f64,

    /// Strategy used when the caller does not pick one: auto, replace or skip
    pub default_strategy: String,

    /// Where processed bundles go (default: `applied/` next to the bundle)
    pub applied_dir: Option<PathBuf>,

    /// Where rejected bundles go (default: `rejected/` next to the bundle)
    pub rejected_dir: Option<PathBuf>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            near_identical_threshold: 0.98,
            merge_threshold: 0.80,
            default_strategy: "auto".to_string(),
            applied_dir: None,
            rejected_dir: None,
        }
    }
}

impl ReconcileConfig {
    /// The configured fallback strategy
    pub fn strategy(&self) -> Result<ConflictStrategy> {
        self.default_strategy
            .parse()
            .map_err(|_| {
                Error::Config(format!("unknown default_strategy: {}", self.default_strategy))
            })
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result limit when the caller passes none (default: 20)
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pks")
        .join("patterns.db")
}

impl StoreConfig {
    /// Create a config for the given database path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    /// Set the machine identifier used for exports
    pub fn with_machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = machine_id.into();
        self
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        fn unit_range(field: &str, value: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{field} must be between 0 and 1")));
            }
            Ok(())
        }

        unit_range("decay.decay_rate", self.decay.decay_rate)?;
        unit_range("decay.min_confidence", self.decay.min_confidence)?;
        unit_range(
            "consolidation.similarity_threshold",
            self.consolidation.similarity_threshold,
        )?;
        unit_range(
            "reconcile.near_identical_threshold",
            self.reconcile.near_identical_threshold,
        )?;
        unit_range("reconcile.merge_threshold", self.reconcile.merge_threshold)?;

        if self.decay.decay_threshold_days < 0 || self.decay.stale_threshold_days < 0 {
            return Err(Error::Config("decay thresholds must not be negative".into()));
        }

        if self.reconcile.merge_threshold > self.reconcile.near_identical_threshold {
            return Err(Error::Config(
                "reconcile.merge_threshold must not exceed near_identical_threshold".into(),
            ));
        }

        self.reconcile.strategy()?;

        if self.machine_id.trim().is_empty() {
            return Err(Error::Config("machine_id must not be empty".into()));
        }

        Ok(())
    }
}
