//! Bundle import and export commands.

use anyhow::{bail, Result};
use colored::Colorize;
use pks_core::reconcile::{
    ConflictStrategy, ExportOptions, ImportOptions, ImportReport, Resolution,
};

use super::{print_header, print_json};
use crate::cli::{ExportArgs, ImportArgs};
use crate::config::Config;

const RESOLUTIONS: [Resolution; 8] = [
    Resolution::Inserted,
    Resolution::Replaced,
    Resolution::Skipped,
    Resolution::KeepLocal,
    Resolution::KeepImported,
    Resolution::WeightedMerge,
    Resolution::ContradictionKeepLocal,
    Resolution::ProtectedLocal,
];

pub fn import(args: ImportArgs, config: &Config, json: bool) -> Result<()> {
    let requested = args
        .strategy
        .as_deref()
        .map(str::parse::<ConflictStrategy>)
        .transpose()?;

    let brain = config.open_brain()?;
    let report = brain.import(
        &args.path,
        &ImportOptions {
            dry_run: args.dry_run,
            strategy: requested,
        },
    )?;

    if json {
        print_json(&report)?;
    } else {
        let strategy = match requested {
            Some(strategy) => strategy,
            None => config.store.reconcile.strategy()?,
        };
        print_report(&report, strategy);
    }

    if !report.success {
        bail!("Import of {} failed", args.path.display());
    }
    Ok(())
}

fn print_report(report: &ImportReport, strategy: ConflictStrategy) {
    let title = if report.dry_run {
        format!("Import preview ({strategy})")
    } else {
        format!("Import ({strategy})")
    };
    print_header(&title);
    println!("  Bundle:     {}", report.bundle.display());
    if let Some(source) = &report.source_machine_id {
        println!("  Source:     {source}");
    }
    println!("  New:        {}", report.new_patterns);
    println!("  Conflicts:  {}", report.conflicts);

    for resolution in RESOLUTIONS {
        let count = report.count(resolution);
        if count > 0 {
            println!("    {:<26} {}", resolution.as_str(), count);
        }
    }

    for preview in &report.previews {
        println!(
            "  {} {} local {:.2} / imported {:.2}, similarity {:.2} -> {}",
            "?".yellow(),
            preview.pattern_id,
            preview.local_confidence,
            preview.imported_confidence,
            preview.similarity,
            preview.recommended.as_str().cyan()
        );
    }

    if let Some(moved) = &report.moved_to {
        println!("  Moved to:   {}", moved.display());
    }

    if report.success {
        println!("{} Import complete", "✓".green());
    } else {
        for error in &report.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }
}

pub fn export(args: ExportArgs, config: &Config, json: bool) -> Result<()> {
    let brain = config.open_brain()?;
    let bundle = brain.export(
        &args.path,
        &ExportOptions {
            namespace: args.namespace,
            include_protected: args.include_protected,
        },
    )?;

    if json {
        return print_json(&serde_json::json!({
            "path": args.path,
            "total_patterns": bundle.total_patterns,
            "source_machine_id": bundle.source_machine_id,
            "signature": bundle.signature,
        }));
    }

    println!(
        "{} Exported {} pattern(s) to {}",
        "✓".green(),
        bundle.total_patterns,
        args.path.display()
    );
    println!("  Signature: {}", bundle.signature.dimmed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::{NewPattern, StoreConfig};

    fn config_for(dir: &std::path::Path, name: &str) -> Config {
        Config {
            path: dir.join("config.toml"),
            store: StoreConfig::new(dir.join(format!("{name}.db"))).with_machine_id(name),
        }
    }

    #[test]
    fn test_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let laptop = config_for(dir.path(), "laptop");
        let desktop = config_for(dir.path(), "desktop");
        laptop
            .open_brain()
            .unwrap()
            .store(
                NewPattern::new("Squash fixups", "git rebase --autosquash", "workflow")
                    .with_id("p1"),
            )
            .unwrap();

        let bundle_path = dir.path().join("inbox").join("laptop.json");
        export(
            ExportArgs {
                path: bundle_path.clone(),
                namespace: None,
                include_protected: false,
            },
            &laptop,
            true,
        )
        .unwrap();

        import(
            ImportArgs {
                path: bundle_path.clone(),
                dry_run: false,
                strategy: None,
            },
            &desktop,
            true,
        )
        .unwrap();

        assert!(desktop.open_brain().unwrap().get("p1").unwrap().is_some());
        assert!(!bundle_path.exists());
        assert!(dir.path().join("inbox").join("applied").join("laptop.json").exists());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = import(
            ImportArgs {
                path: dir.path().join("missing.json"),
                dry_run: true,
                strategy: Some("newest".into()),
            },
            &config_for(dir.path(), "desktop"),
            true,
        );
        assert!(result.is_err());
    }
}
