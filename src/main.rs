// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(author, version, about = "Build server with VM-isolated builds and signed repository publishing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a source tree inside a clone of a template VM
    Build {
        /// Template VM to clone (must be whitelisted)
        #[arg(short, long)]
        machine: String,
        /// Directory of additional build dependencies, uploaded next to the sources
        #[arg(short, long)]
        dependencies: Option<PathBuf>,
        /// Directory holding per-job working directories
        #[arg(long, default_value = crucible::job::DEFAULT_JOBS_DIR)]
        jobs_dir: PathBuf,
        /// Source directory to build (must contain boot.sh)
        source: PathBuf,
        /// Existing empty directory the artifacts are harvested into
        destination: PathBuf,
    },
    /// Sign built packages and merge them into a platform repository
    Publish {
        /// Signing key id
        #[arg(short, long, default_value = crucible::publish::DEFAULT_SIGNKEY)]
        signkey: String,
        /// Build output directory to publish
        source: PathBuf,
        /// Destination repository path
        destination: String,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            machine,
            dependencies,
            jobs_dir,
            source,
            destination,
        } => commands::run_build(
            &machine,
            dependencies.as_deref(),
            &source,
            &destination,
            &jobs_dir,
        ),
        Commands::Publish {
            signkey,
            source,
            destination,
        } => commands::run_publish(&signkey, &source, &destination),
    }
}
