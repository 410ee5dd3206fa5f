//! Reconciler: cross-instance bundle exchange.
//!
//! - [`bundle`]: the signed bundle format
//! - [`importer`]: applying a bundle with conflict resolution
//! - [`export`]: producing a bundle from the local store

pub mod bundle;
pub mod export;
pub mod importer;

pub use bundle::{compute_signature, BundlePattern, ExportBundle, BUNDLE_VERSION};
pub use export::{BrainExporter, ExportOptions};
pub use importer::{
    reconciliation_similarity, BrainImporter, ConflictPreview, ConflictStrategy, ImportOptions,
    ImportReport, MergeDecision, Resolution,
};
