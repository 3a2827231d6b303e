pub mod backup;
pub mod recover;
pub mod repair;
pub mod sessions;
pub mod verify;

use anyhow::Context;
use evidex_core::StorageConfig;
use evidex_store::EvidenceStorage;
use std::path::PathBuf;

/// Config file looked up under the storage root
pub const DEFAULT_CONFIG_FILE: &str = "evidex.toml";

/// Resolve the configuration and open the store
///
/// An explicit `--config` must exist. Without one, `<root>/evidex.toml` is
/// used when present, otherwise defaults apply. `--root` always wins.
pub fn open_storage(root: Option<PathBuf>, config: Option<PathBuf>) -> anyhow::Result<EvidenceStorage> {
    let mut resolved = match (&config, &root) {
        (Some(path), _) => StorageConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        (None, Some(root)) if root.join(DEFAULT_CONFIG_FILE).is_file() => {
            let path = root.join(DEFAULT_CONFIG_FILE);
            StorageConfig::load(&path).with_context(|| format!("loading config {}", path.display()))?
        }
        (None, _) => StorageConfig::default(),
    };
    if let Some(root) = root {
        resolved.root = root;
    }

    tracing::debug!(root = %resolved.root.display(), "opening evidence store");
    EvidenceStorage::open(resolved).context("opening evidence store")
}
