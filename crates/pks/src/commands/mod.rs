//! Command implementations for pks CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod bundle;
pub mod consolidate;
pub mod decay;
pub mod pattern;
pub mod search;
pub mod status;

use anyhow::Result;
use colored::{ColoredString, Colorize};
use pks_core::Pattern;
use serde::Serialize;

/// Print a value as pretty JSON on stdout
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Confidence rendered green/yellow/red by band
pub(crate) fn confidence(value: f64) -> ColoredString {
    let text = format!("{value:.2}");
    if value >= 0.7 {
        text.green()
    } else if value >= 0.4 {
        text.yellow()
    } else {
        text.red()
    }
}

/// One-line summary used by list and search output
pub(crate) fn print_pattern_line(pattern: &Pattern) {
    let mut markers = String::new();
    if pattern.is_pinned {
        markers.push_str(" [pinned]");
    }
    if pattern.is_protected() {
        markers.push_str(" [protected]");
    }
    println!(
        "  {} {} {} {}{}",
        confidence(pattern.confidence),
        pattern.id.dimmed(),
        format!("({})", pattern.pattern_type).cyan(),
        pattern.title,
        markers.magenta()
    );
}

/// Header with an underline, as used by every text report
pub(crate) fn print_header(title: &str) {
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(50));
}
