//! Evidex CLI
//!
//! Operator interface for an evidence store: integrity checks, repair,
//! backups, session inspection and crash recovery.

use clap::{Parser, Subcommand};
use evidex_core::logging_facility::{init, Profile};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "evidex")]
#[command(about = "Evidex - durable evidence storage", long_about = None)]
struct Cli {
    /// Storage root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML config file; defaults to <root>/evidex.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Human-readable debug logs instead of JSON info logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check every record and streaming manifest
    Verify(commands::verify::VerifyArgs),
    /// Restore corrupted records from their backups
    Repair,
    /// Full and incremental backups of the store
    Backup(commands::backup::BackupArgs),
    /// Inspect stored sessions
    Sessions(commands::sessions::SessionsArgs),
    /// Clean up after a crash and list resumable streaming sessions
    Recover,
    /// Record, backup and marker counts
    Stats,
}

fn main() {
    let cli = Cli::parse();
    init(if cli.verbose {
        Profile::Development
    } else {
        Profile::Production
    });

    let result = commands::open_storage(cli.root, cli.config).and_then(|storage| match cli.command {
        Commands::Verify(args) => commands::verify::execute(&storage, args),
        Commands::Repair => commands::repair::execute(&storage),
        Commands::Backup(args) => commands::backup::execute(&storage, args),
        Commands::Sessions(args) => commands::sessions::execute(&storage, args),
        Commands::Recover => commands::recover::execute(&storage),
        Commands::Stats => commands::recover::stats(&storage),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
