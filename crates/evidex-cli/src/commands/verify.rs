//! Integrity verification command

use anyhow::bail;
use clap::Args;
use evidex_store::EvidenceStorage;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Write a corruption marker next to every failing file
    #[arg(long)]
    pub mark: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(storage: &EvidenceStorage, args: VerifyArgs) -> anyhow::Result<()> {
    let report = storage.verify_storage_integrity(args.mark)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        println!("Storage verified clean: {}", storage.layout().root().display());
    } else {
        println!("Integrity findings:");
        for finding in &report.findings {
            println!("  {}", finding);
        }
        if args.mark {
            println!("  markers created: {}", report.markers_created);
        }
    }

    if !report.is_clean() {
        bail!("{} integrity finding(s)", report.findings.len());
    }
    Ok(())
}
