//! Startup recovery and stats commands

use evidex_store::EvidenceStorage;

pub fn execute(storage: &EvidenceStorage) -> anyhow::Result<()> {
    let report = storage.recover()?;
    if report.is_clean() {
        println!("Nothing to recover");
        return Ok(());
    }

    println!("Recovery:");
    println!("  temp files removed: {}", report.removed_temp_files.len());
    for path in &report.removed_temp_files {
        println!("    {}", path.display());
    }
    println!("  stale locks removed: {}", report.stale_locks_removed.len());
    for path in &report.stale_locks_removed {
        println!("    {}", path.display());
    }
    println!("  resumable sessions: {}", report.resumable_sessions.len());
    for manifest in &report.resumable_sessions {
        println!(
            "    {} (session {}, {} files processed)",
            manifest.manifest_id, manifest.session_id, manifest.files_processed
        );
    }
    Ok(())
}

pub fn stats(storage: &EvidenceStorage) -> anyhow::Result<()> {
    let stats = storage.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
