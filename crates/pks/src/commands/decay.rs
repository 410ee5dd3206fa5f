//! Decay commands.

use anyhow::Result;
use colored::Colorize;
use pks_core::decay::{DecayAction as Planned, DecayLogFilter};
use serde_json::json;

use super::{confidence, print_header, print_json};
use crate::cli::{DecayAction, DecayCommand};
use crate::config::Config;

pub fn execute(cmd: DecayCommand, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;

    match cmd.action {
        DecayAction::Run => {
            let stats = brain.apply_decay()?;
            if json {
                return print_json(&stats);
            }

            print_header("Decay sweep");
            println!("  Scanned:  {}", stats.scanned);
            println!("  Decayed:  {}", stats.decayed);
            println!("  Deleted:  {}", stats.deleted);
            if stats.rolled_back {
                println!("  {}", "✗ rolled back, nothing was applied".red());
            }
            for error in &stats.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        DecayAction::Preview => {
            let candidates = brain.decay().get_decay_candidates()?;
            if json {
                return print_json(&candidates);
            }

            print_header(&format!("Decay candidates ({})", candidates.len()));
            if candidates.is_empty() {
                println!("  {}", "Nothing to decay".dimmed());
            }
            for candidate in &candidates {
                let action = match candidate.action {
                    Planned::Decay => "decay".yellow(),
                    Planned::Delete => "delete".red(),
                };
                println!(
                    "  {} {} {} -> {} ({} days) {}",
                    action,
                    candidate.pattern_id.dimmed(),
                    confidence(candidate.confidence),
                    confidence(candidate.projected_confidence),
                    candidate.days_inactive,
                    candidate.title
                );
            }
        }

        DecayAction::Stale {
            days,
            include_protected,
        } => {
            let days = days.unwrap_or(config.store.decay.stale_threshold_days);
            let removed = brain.decay().remove_stale(days, !include_protected)?;
            if json {
                return print_json(&json!({ "days": days, "removed": removed }));
            }
            println!(
                "{} Removed {} stale pattern(s) unused for more than {} days",
                "✓".green(),
                removed,
                days
            );
        }

        DecayAction::Log { pattern, limit } => {
            let entries = brain.decay().get_decay_log(&DecayLogFilter {
                pattern_id: pattern,
                limit: Some(limit),
                ..Default::default()
            })?;
            if json {
                return print_json(&entries);
            }

            print_header(&format!("Decay log ({})", entries.len()));
            for entry in &entries {
                println!(
                    "  {} {} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    entry.pattern_id,
                    confidence(entry.old_confidence),
                    confidence(entry.new_confidence),
                    entry.reason
                );
            }
        }
    }

    Ok(())
}
