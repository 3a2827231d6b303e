//! On-disk layout of an evidence store
//!
//! ```text
//! <root>/
//!   sessions/<id>.session.json
//!   observations/<id>.observation.json
//!   observations/<manifest_id>.manifest.json
//!   questions/<id>.question.json
//!   patterns/<id>.pattern.json
//!   <kind>/.backups/<filename>.<stamp>.bak
//!   backups/<backup_id>/...   backups/manifests.json
//!   memory/<operation>.memory.json
//!   .locks/<filename>.lock
//! ```
//!
//! Corruption markers live next to the file they describe
//! (`<name><ext>.corrupted`).

use crate::errors::{io_error, validate_id, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_SUFFIX: &str = ".manifest.json";
pub const MARKER_SUFFIX: &str = ".corrupted";
pub const LOCK_SUFFIX: &str = ".lock";
pub const TEMP_SUFFIX: &str = ".tmp";
pub const RECORD_BACKUP_SUFFIX: &str = ".bak";

pub const LOCKS_DIR: &str = ".locks";
pub const RECORD_BACKUPS_DIR: &str = ".backups";
pub const BACKUPS_DIR: &str = "backups";
pub const BACKUP_INDEX_FILE: &str = "manifests.json";
pub const MEMORY_DIR: &str = "memory";

/// Kind of record persisted by the transaction coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Session,
    Observation,
    Question,
    Pattern,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Session,
        RecordKind::Observation,
        RecordKind::Question,
        RecordKind::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Observation => "observation",
            RecordKind::Question => "question",
            RecordKind::Pattern => "pattern",
        }
    }

    /// Directory under the storage root
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Session => "sessions",
            RecordKind::Observation => "observations",
            RecordKind::Question => "questions",
            RecordKind::Pattern => "patterns",
        }
    }

    /// File name suffix, e.g. `.session.json`
    pub fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Session => ".session.json",
            RecordKind::Observation => ".observation.json",
            RecordKind::Question => ".question.json",
            RecordKind::Pattern => ".pattern.json",
        }
    }

    /// Short prefix used for generated record ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            RecordKind::Session => "ses",
            RecordKind::Observation => "obs",
            RecordKind::Question => "qst",
            RecordKind::Pattern => "pat",
        }
    }

    /// Record id encoded in a file name of this kind, if it is one
    pub fn parse_file_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(self.suffix())
            .filter(|id| !id.is_empty() && !id.starts_with('.'))
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.dir_name() == s)
            .ok_or_else(|| format!("unknown record kind: {}", s))
    }
}

/// Path computations for one storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every directory of the layout
    ///
    /// Directory creation is a layout concern; the atomic writer itself
    /// never creates directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        let mut dirs: Vec<PathBuf> = RecordKind::ALL
            .iter()
            .flat_map(|k| [self.record_dir(*k), self.record_backup_dir(*k)])
            .collect();
        dirs.push(self.locks_dir());
        dirs.push(self.backups_dir());
        dirs.push(self.memory_dir());

        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|e| io_error("create_layout_dir", &dir, e))?;
        }
        Ok(())
    }

    pub fn record_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// `<root>/<kind dir>/<id><suffix>`
    pub fn record_path(&self, kind: RecordKind, id: &str) -> Result<PathBuf> {
        validate_id(kind.as_str(), id)?;
        Ok(self
            .record_dir(kind)
            .join(format!("{}{}", id, kind.suffix())))
    }

    /// Directory holding pre-overwrite copies of records of `kind`
    pub fn record_backup_dir(&self, kind: RecordKind) -> PathBuf {
        self.record_dir(kind).join(RECORD_BACKUPS_DIR)
    }

    /// Streaming manifests share the observations directory
    pub fn manifest_path(&self, manifest_id: &str) -> Result<PathBuf> {
        validate_id("manifest", manifest_id)?;
        Ok(self
            .record_dir(RecordKind::Observation)
            .join(format!("{}{}", manifest_id, MANIFEST_SUFFIX)))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(MEMORY_DIR)
    }
}

/// `<dir>/<file name><suffix>` for a sibling of `path`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Whether a file name looks like an abandoned atomic-write temp file
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}
