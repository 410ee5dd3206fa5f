//! pks - Pattern Knowledge Store CLI
//!
//! Inspect and maintain a local pattern store: search it, run decay and
//! consolidation sweeps, and exchange signed bundles with other machines.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("pks=info".parse()?)
                .add_directive("pks_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    // Execute command
    match cli.command {
        Commands::Pattern(cmd) => commands::pattern::execute(cmd, &config, cli.json),
        Commands::Search(args) => commands::search::execute(args, &config, cli.json),
        Commands::Pin { id, force } => commands::pattern::pin(&id, true, force, &config, cli.json),
        Commands::Unpin { id, force } => {
            commands::pattern::pin(&id, false, force, &config, cli.json)
        }
        Commands::Decay(cmd) => commands::decay::execute(cmd, &config, cli.json),
        Commands::Consolidate(args) => commands::consolidate::execute(args, &config, cli.json),
        Commands::Import(args) => commands::bundle::import(args, &config, cli.json),
        Commands::Export(args) => commands::bundle::export(args, &config, cli.json),
        Commands::Health => commands::status::health(&config, cli.json),
        Commands::Stats => commands::status::stats(&config, cli.json),
        Commands::Config => commands::status::show_config(&config, cli.json),
        Commands::Version => {
            println!("pks {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
