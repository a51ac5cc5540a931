//! Geoedit CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "geoedit")]
#[command(about = "Inspect and maintain saved map editing sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Session root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to <root>/geoedit.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the saved history: entries, cursor and pending changes
    Inspect,
    /// Print the pending changes as JSON
    Diff {
        /// Include entities that only lost or gained references
        #[arg(long)]
        complete: bool,
    },
    /// Verify the saved edits reference nothing that is gone
    Check,
    /// Delete the saved session
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "geoedit={log_level},geoedit_core={log_level},geoedit_session={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Geoedit v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Session root: {}", cli.root.display());

    let config_path = cli.config.unwrap_or_else(|| cli.root.join(commands::CONFIG_FILE));
    match cli.command {
        Commands::Inspect => commands::inspect(&cli.root, &config_path),
        Commands::Diff { complete } => commands::diff(&cli.root, &config_path, complete),
        Commands::Check => commands::check(&cli.root, &config_path),
        Commands::Clear => commands::clear(&cli.root, &config_path),
        Commands::Version => {
            println!("Geoedit v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
