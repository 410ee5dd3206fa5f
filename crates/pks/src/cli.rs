//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Pattern Knowledge Store CLI
///
/// Confidence-scored patterns with decay, consolidation and bundle exchange.
#[derive(Parser, Debug)]
#[command(name = "pks")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "PKS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pattern records (add, show, list, delete, tag)
    Pattern(PatternCommand),

    /// Ranked full-text search
    Search(SearchArgs),

    /// Exempt a pattern from decay
    Pin {
        /// Pattern ID
        id: String,

        /// Allow pinning protected patterns
        #[arg(long)]
        force: bool,
    },

    /// Make a pinned pattern decayable again
    Unpin {
        /// Pattern ID
        id: String,

        /// Allow unpinning protected patterns
        #[arg(long)]
        force: bool,
    },

    /// Confidence decay (run, preview, stale, log)
    Decay(DecayCommand),

    /// Merge near-duplicate patterns
    Consolidate(ConsolidateArgs),

    /// Apply a bundle exported by another store
    Import(ImportArgs),

    /// Write a signed bundle of local patterns
    Export(ExportArgs),

    /// Check store structure and schema version
    Health,

    /// Show pattern counts
    Stats,

    /// Show the effective configuration
    Config,

    /// Show version information
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PatternCommand {
    #[command(subcommand)]
    pub action: PatternAction,
}

#[derive(Subcommand, Debug)]
pub enum PatternAction {
    /// Store a new pattern
    Add {
        /// Short title
        title: String,

        /// Pattern body
        content: String,

        /// Pattern type (workflow, intent, bug-catching, solution, fact, convention)
        #[arg(short = 't', long = "type", default_value = "solution")]
        pattern_type: String,

        /// Initial confidence (0.0 - 1.0)
        #[arg(short, long)]
        confidence: Option<f64>,

        /// Namespace (repeatable)
        #[arg(short, long = "namespace")]
        namespaces: Vec<String>,

        /// Store as protected (cross-project) knowledge
        #[arg(long)]
        protected: bool,

        /// Pin on creation
        #[arg(long)]
        pin: bool,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show one pattern with its tags and relationships
    Show {
        /// Pattern ID
        id: String,
    },

    /// List patterns
    List {
        /// Filter by pattern type
        #[arg(short = 't', long = "type")]
        pattern_type: Option<String>,

        /// Filter by namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Only pinned patterns
        #[arg(long)]
        pinned: bool,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Delete a pattern
    Delete {
        /// Pattern ID
        id: String,

        /// Allow deleting protected patterns
        #[arg(long)]
        force: bool,
    },

    /// Attach a tag
    Tag {
        /// Pattern ID
        id: String,

        /// Tag label
        tag: String,
    },

    /// Link two patterns
    Link {
        /// Source pattern ID
        from: String,

        /// Target pattern ID
        to: String,

        /// Relationship kind (supersedes, related_to, depends_on, conflicts_with)
        #[arg(short, long, default_value = "related_to")]
        kind: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Free-text query (empty lists by confidence)
    #[arg(default_value = "")]
    pub query: String,

    /// Prefer patterns from this namespace, falling back to protected ones
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Filter by pattern type
    #[arg(short = 't', long = "type")]
    pub pattern_type: Option<String>,

    /// Minimum confidence
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Maximum results (defaults to the configured limit)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Decay Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct DecayCommand {
    #[command(subcommand)]
    pub action: DecayAction,
}

#[derive(Subcommand, Debug)]
pub enum DecayAction {
    /// Run one decay sweep
    Run,

    /// Show what the next sweep would do
    Preview,

    /// Delete long-unused low-confidence patterns
    Stale {
        /// Inactivity threshold in days (defaults to the configured value)
        #[arg(short, long)]
        days: Option<i64>,

        /// Also remove protected patterns
        #[arg(long)]
        include_protected: bool,
    },

    /// Show the decay audit log
    Log {
        /// Only entries for this pattern
        #[arg(short, long)]
        pattern: Option<String>,

        /// Maximum entries
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Maintenance
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ConsolidateArgs {
    /// Only consider patterns in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Report merges without applying them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Bundle file
    pub path: PathBuf,

    /// Preview conflicts without writing or moving the bundle
    #[arg(long)]
    pub dry_run: bool,

    /// Conflict strategy: auto, replace or skip (defaults to the configured one)
    #[arg(short, long)]
    pub strategy: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file
    pub path: PathBuf,

    /// Only export patterns in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Include protected patterns
    #[arg(long)]
    pub include_protected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import_with_global_flags() {
        let cli = Cli::try_parse_from([
            "pks", "import", "bundle.json", "--dry-run", "--strategy", "skip", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Import(args) => {
                assert!(args.dry_run);
                assert_eq!(args.strategy.as_deref(), Some("skip"));
                assert_eq!(args.path, PathBuf::from("bundle.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_pattern_add() {
        let cli = Cli::try_parse_from([
            "pks", "pattern", "add", "Title", "Body", "-t", "workflow", "-n", "api", "-n", "db",
            "--tag", "rust",
        ])
        .unwrap();
        match cli.command {
            Commands::Pattern(PatternCommand {
                action: PatternAction::Add { pattern_type, namespaces, tags, .. },
            }) => {
                assert_eq!(pattern_type, "workflow");
                assert_eq!(namespaces, vec!["api", "db"]);
                assert_eq!(tags, vec!["rust"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
