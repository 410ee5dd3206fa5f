//! Pattern record commands.

use anyhow::{bail, Result};
use colored::Colorize;
use pks_core::relationships::Direction;
use pks_core::{NewPattern, PatternFilter, PatternScope, PatternType, WriteAccess};
use serde_json::json;

use super::{confidence, print_header, print_json, print_pattern_line};
use crate::cli::{PatternAction, PatternCommand};
use crate::config::Config;

pub fn execute(cmd: PatternCommand, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;

    match cmd.action {
        PatternAction::Add {
            title,
            content,
            pattern_type,
            confidence: initial,
            namespaces,
            protected,
            pin,
            tags,
        } => {
            let mut input = NewPattern::new(title, content, PatternType::from(pattern_type));
            input.confidence = initial;
            input.namespaces = namespaces.into_iter().collect();
            input.is_pinned = pin;
            if protected {
                input.scope = Some(PatternScope::Protected);
            }

            let pattern = brain.store(input)?;
            for tag in &tags {
                brain.tags().add(&pattern.id, tag)?;
            }

            if json {
                return print_json(&pattern);
            }
            println!("{} Stored pattern {}", "✓".green(), pattern.id.bold());
        }

        PatternAction::Show { id } => {
            let Some(pattern) = brain.get(&id)? else {
                bail!("Pattern not found: {}", id);
            };
            let tags = brain.tags().get(&id)?;
            let edges = brain.relationships().get(&id, Direction::Both)?;

            if json {
                return print_json(&json!({
                    "pattern": pattern,
                    "tags": tags,
                    "relationships": edges,
                }));
            }

            print_header(&pattern.title);
            println!("  ID:          {}", pattern.id);
            println!("  Type:        {}", pattern.pattern_type);
            println!("  Scope:       {}", pattern.scope);
            println!("  Confidence:  {}", confidence(pattern.confidence));
            println!("  Pinned:      {}", pattern.is_pinned);
            if !pattern.namespaces.is_empty() {
                let namespaces: Vec<&str> = pattern.namespaces.iter().map(String::as_str).collect();
                println!("  Namespaces:  {}", namespaces.join(", "));
            }
            if !tags.is_empty() {
                println!("  Tags:        {}", tags.join(", "));
            }
            println!("  Created:     {}", pattern.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!(
                "  Last used:   {} ({} uses)",
                pattern.last_accessed.format("%Y-%m-%d %H:%M:%S"),
                pattern.access_count
            );
            println!();
            println!("{}", pattern.content);
            if !edges.is_empty() {
                println!();
                println!("{}", "Relationships".bold());
                for edge in &edges {
                    println!(
                        "  {} -[{}]-> {}",
                        edge.from_id,
                        edge.kind.as_str().cyan(),
                        edge.to_id
                    );
                }
            }
        }

        PatternAction::List {
            pattern_type,
            namespace,
            pinned,
            limit,
        } => {
            let filter = PatternFilter {
                pattern_type: pattern_type.map(PatternType::from),
                namespace,
                pinned: pinned.then_some(true),
                limit: Some(limit),
                ..Default::default()
            };
            let patterns = brain.list(&filter)?;

            if json {
                return print_json(&patterns);
            }
            print_header(&format!("Patterns ({})", patterns.len()));
            if patterns.is_empty() {
                println!("  {}", "No patterns found".dimmed());
            }
            for pattern in &patterns {
                print_pattern_line(pattern);
            }
        }

        PatternAction::Delete { id, force } => {
            let access = if force {
                WriteAccess::Administrative
            } else {
                WriteAccess::Standard
            };
            let deleted = brain.patterns().delete_with(&id, access)?;

            if json {
                return print_json(&json!({ "id": id, "deleted": deleted }));
            }
            if deleted {
                println!("{} Deleted pattern {}", "✓".green(), id);
            } else {
                println!("{} Pattern {} not found", "○".yellow(), id);
            }
        }

        PatternAction::Tag { id, tag } => {
            let added = brain.tags().add(&id, &tag)?;
            if json {
                return print_json(&json!({ "id": id, "tag": tag, "added": added }));
            }
            if added {
                println!("{} Tagged {} with {}", "✓".green(), id, tag.cyan());
            } else {
                println!("{} {} already carries {}", "○".yellow(), id, tag);
            }
        }

        PatternAction::Link { from, to, kind } => {
            let created = brain.relationships().create(&from, &to, kind.as_str())?;
            if json {
                return print_json(
                    &json!({ "from": from, "to": to, "kind": kind, "created": created }),
                );
            }
            if created {
                println!("{} {} -[{}]-> {}", "✓".green(), from, kind.cyan(), to);
            } else {
                println!("{} Relationship already exists", "○".yellow());
            }
        }
    }

    Ok(())
}

/// Pin or unpin one pattern
pub fn pin(id: &str, pinned: bool, force: bool, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let access = if force {
        WriteAccess::Administrative
    } else {
        WriteAccess::Standard
    };
    let changed = if pinned {
        brain.patterns().pin_with(id, access)?
    } else {
        brain.patterns().unpin_with(id, access)?
    };

    if json {
        return print_json(&json!({ "id": id, "pinned": pinned, "changed": changed }));
    }
    let verb = if pinned { "Pinned" } else { "Unpinned" };
    if changed {
        println!("{} {} {}", "✓".green(), verb, id);
    } else {
        println!("{} Pattern {} not found", "○".yellow(), id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pks_core::StoreConfig;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config {
            path: dir.path().join("config.toml"),
            store: StoreConfig::new(dir.path().join("patterns.db")),
        }
    }

    #[test]
    fn test_add_then_pin() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        execute(
            PatternCommand {
                action: PatternAction::Add {
                    title: "Vendor lockfiles".into(),
                    content: "commit Cargo.lock for binaries".into(),
                    pattern_type: "convention".into(),
                    confidence: Some(0.9),
                    namespaces: vec!["rust".into()],
                    protected: false,
                    pin: false,
                    tags: vec!["Release Process".into()],
                },
            },
            &config,
            true,
        )
        .unwrap();

        let brain = config.open_brain().unwrap();
        let stored = brain.list(&PatternFilter::default()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].confidence, 0.9);
        assert_eq!(brain.tags().get(&stored[0].id).unwrap(), vec!["release-process"]);
        drop(brain);

        pin(&stored[0].id, true, false, &config, true).unwrap();
        assert!(config.open_brain().unwrap().get(&stored[0].id).unwrap().unwrap().is_pinned);
    }

    #[test]
    fn test_delete_protected_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        config
            .open_brain()
            .unwrap()
            .store(
                NewPattern::new("Global", "shared", "fact")
                    .with_id("g")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();

        let refused = execute(
            PatternCommand {
                action: PatternAction::Delete { id: "g".into(), force: false },
            },
            &config,
            true,
        );
        assert!(refused.is_err());

        execute(
            PatternCommand {
                action: PatternAction::Delete { id: "g".into(), force: true },
            },
            &config,
            true,
        )
        .unwrap();
        assert!(config.open_brain().unwrap().get("g").unwrap().is_none());
    }

    #[test]
    fn test_pin_protected_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        config
            .open_brain()
            .unwrap()
            .store(
                NewPattern::new("Global", "shared", "fact")
                    .with_id("g")
                    .with_scope(PatternScope::Protected),
            )
            .unwrap();

        assert!(pin("g", true, false, &config, true).is_err());
        pin("g", true, true, &config, true).unwrap();
        assert!(config.open_brain().unwrap().get("g").unwrap().unwrap().is_pinned);
    }
}
