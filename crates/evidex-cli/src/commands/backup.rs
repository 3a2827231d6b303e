//! Backup commands

use anyhow::bail;
use clap::{Args, Subcommand};
use evidex_store::{BackupManifest, EvidenceStorage};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Full backup of the store
    Create {
        #[arg(long)]
        id: Option<String>,
    },
    /// Backup of what changed since a parent backup
    Incremental {
        #[arg(long)]
        parent: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Restore a backup (and its parent chain) into a directory
    Restore {
        backup_id: String,
        /// Defaults to the storage root
        #[arg(long)]
        target: Option<PathBuf>,
        /// Build the result in a staging directory and swap it in
        #[arg(long)]
        staged: bool,
    },
    /// Recompute a backup's checksum
    Verify { backup_id: String },
    /// List backups, oldest first
    List,
    /// Delete old backups per the retention policy
    Cleanup {
        /// Defaults to backup.keep_count from the config
        #[arg(long)]
        keep: Option<usize>,
        /// Defaults to backup.max_age_days from the config
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

pub fn execute(storage: &EvidenceStorage, args: BackupArgs) -> anyhow::Result<()> {
    match args.command {
        BackupCommand::Create { id } => {
            let manifest = storage.create_backup(id.as_deref())?;
            print_created(&manifest);
        }
        BackupCommand::Incremental { parent, id } => {
            let manifest = storage.create_incremental_backup(&parent, id.as_deref())?;
            print_created(&manifest);
        }
        BackupCommand::Restore {
            backup_id,
            target,
            staged,
        } => {
            let target = target.unwrap_or_else(|| storage.layout().root().to_path_buf());
            // A staged swap of the root would also swap out backups/
            if staged && target == storage.layout().root() {
                bail!("--staged needs a --target outside the storage root");
            }
            let summary = if staged {
                storage.backups().restore_backup_staged(&backup_id, &target)?
            } else {
                storage.backups().restore_backup(&backup_id, &target)?
            };
            println!("Backup restored:");
            println!("  backup_id: {}", summary.backup_id);
            println!("  chain: {}", summary.chain.join(" -> "));
            println!("  files_restored: {}", summary.files_restored);
            println!("  files_removed: {}", summary.files_removed);
            println!("  target: {}", target.display());
        }
        BackupCommand::Verify { backup_id } => {
            let verification = storage.backups().verify_backup(&backup_id)?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
            if !verification.valid {
                bail!("backup {} failed verification", backup_id);
            }
        }
        BackupCommand::List => {
            let backups = storage.backups().list_backups()?;
            if backups.is_empty() {
                println!("No backups");
            }
            for m in backups {
                let kind = match &m.parent_id {
                    Some(parent) => format!("incremental of {}", parent),
                    None => "full".to_string(),
                };
                println!(
                    "{}  {}  {} files  {} bytes  {}",
                    m.backup_id,
                    m.created_at.to_rfc3339(),
                    m.file_count,
                    m.total_size,
                    kind
                );
            }
        }
        BackupCommand::Cleanup { keep, max_age_days } => {
            let policy = &storage.config().backup;
            let deleted = storage.backups().cleanup_old_backups(
                keep.unwrap_or(policy.keep_count),
                max_age_days.unwrap_or(policy.max_age_days),
            )?;
            if deleted.is_empty() {
                println!("No backups deleted");
            }
            for id in deleted {
                println!("deleted: {}", id);
            }
        }
    }
    Ok(())
}

fn print_created(manifest: &BackupManifest) {
    println!("Backup created:");
    println!("  backup_id: {}", manifest.backup_id);
    println!("  incremental: {}", manifest.incremental);
    println!("  file_count: {}", manifest.file_count);
    println!("  total_size: {}", manifest.total_size);
    println!("  checksum: {}", manifest.checksum);
}
