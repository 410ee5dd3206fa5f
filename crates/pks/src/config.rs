//! Configuration management for pks.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (PKS_DATABASE_PATH, PKS_MACHINE_ID)
//! 2. Config file (`--config`, $PKS_CONFIG or the platform config directory)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use pks_core::{Brain, StoreConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Machine id left in place when nothing better is configured
const PLACEHOLDER_MACHINE_ID: &str = "local";

/// Resolved CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// File the settings were read from (it may not exist)
    pub path: PathBuf,

    /// Store settings handed to pks-core
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut store = if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read config file")?;
            StoreConfig::from_toml_str(&content).context("Failed to parse config file")?
        } else {
            StoreConfig::default()
        };

        apply_env(
            &mut store,
            std::env::var("PKS_DATABASE_PATH").ok(),
            std::env::var("PKS_MACHINE_ID").ok(),
        );
        if store.machine_id == PLACEHOLDER_MACHINE_ID {
            if let Some(host) = local_hostname() {
                store.machine_id = host;
            }
        }
        store.validate().context("Invalid configuration")?;

        debug!(
            config = %path.display(),
            database = %store.database_path.display(),
            "Configuration loaded"
        );
        Ok(Self { path, store })
    }

    /// Get the default config file path.
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "pks", "pks") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pks")
                .join("config.toml")
        }
    }

    /// Open the configured store.
    pub fn open_brain(&self) -> Result<Brain> {
        Brain::open(&self.store).with_context(|| {
            format!(
                "Failed to open pattern store at {}",
                self.store.database_path.display()
            )
        })
    }
}

fn apply_env(store: &mut StoreConfig, database_path: Option<String>, machine_id: Option<String>) {
    if let Some(path) = database_path.filter(|p| !p.trim().is_empty()) {
        store.database_path = PathBuf::from(path);
    }
    if let Some(id) = machine_id.filter(|m| !m.trim().is_empty()) {
        store.machine_id = id;
    }
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
