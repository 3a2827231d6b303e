use crate::checksum::record_checksum;
use crate::errors::{serialization_error, Result};
use crate::layout::RecordKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope version written into every record
pub const RECORD_SCHEMA_VERSION: u64 = 1;

/// The persisted form of every evidence record
///
/// The payload is opaque to the store. `file_path` and `file_index` are only
/// present on records written by a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub kind: RecordKind,
    pub session_id: String,
    pub schema_version: u64,
    pub written_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_index: Option<u64>,
    pub payload: Value,
    pub checksum: String,
}

impl EvidenceRecord {
    /// Build a record with its checksum attached
    pub fn sealed(
        id: impl Into<String>,
        kind: RecordKind,
        session_id: impl Into<String>,
        payload: Value,
    ) -> Result<Self> {
        Self {
            id: id.into(),
            kind,
            session_id: session_id.into(),
            schema_version: RECORD_SCHEMA_VERSION,
            written_at: Utc::now(),
            file_path: None,
            file_index: None,
            payload,
            checksum: String::new(),
        }
        .seal()
    }

    /// Attach streaming position and re-seal
    pub fn at_file(mut self, file_path: impl Into<String>, file_index: u64) -> Result<Self> {
        self.file_path = Some(file_path.into());
        self.file_index = Some(file_index);
        self.seal()
    }

    fn seal(mut self) -> Result<Self> {
        self.checksum = record_checksum(&self.to_value()?);
        Ok(self)
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| serialization_error(format!("record {}", self.id), e))
    }

    /// Pretty JSON bytes as written to disk
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| serialization_error(format!("record {}", self.id), e))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Whether the stored checksum matches the record content
    pub fn checksum_matches(&self) -> bool {
        self.to_value()
            .map(|v| record_checksum(&v) == self.checksum)
            .unwrap_or(false)
    }
}
