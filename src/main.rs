//! Tripwire CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(about = "Fine-grained file dependency tracking for incremental builds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root path (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Read files through a trap and print the recorded dependencies as JSON
    Deps {
        /// Files to read
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Check whether saved dependencies still match the disk
    Check {
        /// JSON file produced by `deps`
        saved: PathBuf,
    },
    /// Diff two JSON graph snapshots
    Diff {
        from: PathBuf,
        to: PathBuf,
    },
    /// Watch files and report every invalidation
    Watch {
        /// Files to track
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "tripwire={log_level},tripwire_core={log_level},tripwire_watcher={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Project root: {}", cli.root.display());

    match cli.command {
        Commands::Deps { files } => commands::deps(cli.root, files).await,
        Commands::Check { saved } => {
            if commands::check(cli.root, saved).await? {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Commands::Diff { from, to } => commands::diff(from, to),
        Commands::Watch { files } => commands::watch(cli.root, files).await,
        Commands::Version => {
            println!("Tripwire v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
