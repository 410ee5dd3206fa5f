//! Health, statistics and configuration commands.

use anyhow::{bail, Result};
use colored::Colorize;
use pks_core::db::HealthStatus;

use super::{print_header, print_json};
use crate::config::Config;

pub fn health(config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let report = brain.health_check();

    if json {
        print_json(&report)?;
    } else {
        print_header("pks Health");
        let status = match report.status {
            HealthStatus::Healthy => report.status.to_string().green(),
            HealthStatus::Degraded => report.status.to_string().yellow(),
            HealthStatus::Critical => report.status.to_string().red(),
        };
        println!("  Status:   {status}");
        println!("  Database: {}", config.store.database_path.display());
        match report.schema_version {
            Some(version) => {
                println!("  Schema:   v{version} (expected v{})", report.expected_version)
            }
            None => println!("  Schema:   {}", "unknown".red()),
        }
        if let Some(count) = report.pattern_count {
            println!("  Patterns: {count}");
        }
        println!();
        for check in &report.checks {
            let mark = if check.passed { "✓".green() } else { "✗".red() };
            println!("  {} {}: {}", mark, check.name, check.detail);
        }
    }

    if report.status == HealthStatus::Critical {
        bail!("Pattern store is critical");
    }
    Ok(())
}

pub fn stats(config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let stats = brain.stats()?;

    if json {
        return print_json(&stats);
    }

    print_header("pks Stats");
    println!("  Total:        {}", stats.total);
    println!("  Protected:    {}", stats.protected);
    println!("  Application:  {}", stats.application);
    println!("  Pinned:       {}", stats.pinned);
    if !stats.by_type.is_empty() {
        println!();
        println!("{}", "By type".bold());
        for (pattern_type, count) in &stats.by_type {
            println!("  {pattern_type:<14} {count}");
        }
    }

    let tags = brain.tags().list_all_tags()?;
    if !tags.is_empty() {
        println!();
        println!("{}", "Top tags".bold());
        for (tag, count) in tags.iter().take(10) {
            println!("  {tag:<14} {count}");
        }
    }
    Ok(())
}

pub fn show_config(config: &Config, json: bool) -> Result<()> {
    if json {
        return print_json(&config.store);
    }

    let source = if config.path.exists() {
        config.path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", config.path.display())
    };
    println!("{} {}", "# config:".dimmed(), source.dimmed());
    print!("{}", toml::to_string_pretty(&config.store)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::StoreConfig;

    #[test]
    fn test_status_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            path: dir.path().join("config.toml"),
            store: StoreConfig::new(dir.path().join("patterns.db")),
        };
        health(&config, true).unwrap();
        stats(&config, false).unwrap();
        show_config(&config, false).unwrap();
    }
}
