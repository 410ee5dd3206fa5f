//! Consolidation command.

use anyhow::Result;
use colored::Colorize;
use pks_core::consolidation::ConsolidateOptions;

use super::{print_header, print_json};
use crate::cli::ConsolidateArgs;
use crate::config::Config;

pub fn execute(args: ConsolidateArgs, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let stats = brain.consolidate(&ConsolidateOptions {
        namespace: args.namespace,
        dry_run: args.dry_run,
    })?;

    if json {
        return print_json(&stats);
    }

    let title = if stats.dry_run {
        "Consolidation (dry run)"
    } else {
        "Consolidation"
    };
    print_header(title);
    println!("  Groups scanned:    {}", stats.groups_scanned);
    println!("  Patterns scanned:  {}", stats.patterns_scanned);
    println!("  Consolidated:      {}", stats.consolidated_count);
    for merge in &stats.merges {
        println!(
            "  {} {} <- {} (similarity {:.2}, confidence {:.2} -> {:.2})",
            "•".cyan(),
            merge.winner_id,
            merge.loser_id.dimmed(),
            merge.similarity,
            merge.confidence_before,
            merge.confidence_after
        );
    }
    if stats.rolled_back {
        println!("  {}", "✗ rolled back, nothing was applied".red());
    }
    for error in &stats.errors {
        println!("  {} {}", "✗".red(), error);
    }
    Ok(())
}
