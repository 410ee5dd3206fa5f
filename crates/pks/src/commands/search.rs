//! Search command.

use anyhow::Result;
use colored::Colorize;
use pks_core::search::SearchFilters;
use pks_core::PatternType;

use super::{print_header, print_json, print_pattern_line};
use crate::cli::SearchArgs;
use crate::config::Config;

pub fn execute(args: SearchArgs, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let limit = args.limit.unwrap_or(config.store.search.default_limit);

    // A bare namespace search falls back to protected knowledge; extra
    // filters make it a strict namespace query.
    let prioritized = args.pattern_type.is_none() && args.min_confidence.is_none();
    let results = match args.namespace {
        Some(namespace) if prioritized => brain
            .searcher()
            .search_with_namespace_priority(&args.query, &namespace, limit)?,
        namespace => {
            let filters = SearchFilters {
                pattern_type: args.pattern_type.map(PatternType::from),
                namespace,
                min_confidence: args.min_confidence,
                ..Default::default()
            };
            brain.search(&args.query, &filters, Some(limit))?
        }
    };

    if json {
        return print_json(&results);
    }

    print_header(&format!("Results for \"{}\" ({})", args.query, results.len()));
    if results.is_empty() {
        println!("  {}", "No matching patterns".dimmed());
    }
    for pattern in &results {
        print_pattern_line(pattern);
    }
    Ok(())
}
