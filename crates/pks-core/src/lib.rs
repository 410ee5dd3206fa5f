//! pks-core - Pattern knowledge store
//!
//! A persistent store of confidence-scored "patterns" (reusable solutions,
//! workflows, facts) that ages unused entries, merges near-duplicates and
//! reconciles copies exchanged between independent stores:
//!
//! - **db**: SQLite substrate, migrations and health checks
//! - **patterns**: CRUD over pattern records
//! - **search**: ranked full-text lookup with usage tracking
//! - **tags** / **relationships**: labels and typed edges between patterns
//! - **decay**: confidence erosion, pinning and the decay audit log
//! - **consolidation**: similarity-based merge of near-duplicates
//! - **reconcile**: signed bundle export and import
//! - **brain**: one facade over all of the above

pub mod brain;
pub mod config;
pub mod consolidation;
pub mod db;
pub mod decay;
pub mod error;
pub mod patterns;
pub mod reconcile;
pub mod relationships;
pub mod search;
pub mod tags;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use brain::Brain;
pub use config::StoreConfig;
pub use db::Database;
pub use error::{Error, Result};
pub use types::{
    is_protected, NewPattern, Pattern, PatternFilter, PatternScope, PatternType, PatternUpdate,
    WriteAccess, PROTECTED_NAMESPACE,
};
