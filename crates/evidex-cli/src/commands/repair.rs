//! Repair command

use anyhow::bail;
use evidex_store::EvidenceStorage;

pub fn execute(storage: &EvidenceStorage) -> anyhow::Result<()> {
    let report = storage.repair_corruption()?;

    if report.repaired.is_empty() && report.unrepaired.is_empty() {
        println!("Nothing to repair");
        return Ok(());
    }
    for path in &report.repaired {
        println!("repaired: {}", path.display());
    }
    for failed in &report.unrepaired {
        println!("unrepaired: {} ({})", failed.path.display(), failed.reason);
    }

    if !report.unrepaired.is_empty() {
        bail!("{} file(s) could not be repaired", report.unrepaired.len());
    }
    Ok(())
}
