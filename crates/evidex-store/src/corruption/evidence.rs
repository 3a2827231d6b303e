use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Classification of a corruption finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    HashMismatch,
    SchemaMismatch,
    PartialWrite,
    SizeMismatch,
    ParseError,
    MissingField,
    TypeMismatch,
    VersionMismatch,
    ExplicitMarker,
}

impl CorruptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptionKind::HashMismatch => "hash_mismatch",
            CorruptionKind::SchemaMismatch => "schema_mismatch",
            CorruptionKind::PartialWrite => "partial_write",
            CorruptionKind::SizeMismatch => "size_mismatch",
            CorruptionKind::ParseError => "parse_error",
            CorruptionKind::MissingField => "missing_field",
            CorruptionKind::TypeMismatch => "type_mismatch",
            CorruptionKind::VersionMismatch => "version_mismatch",
            CorruptionKind::ExplicitMarker => "explicit_marker",
        }
    }
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One corruption finding
///
/// Built once by a detector routine and not mutated afterwards; the
/// `with_*` methods consume the value and are only used while building it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptionEvidence {
    #[serde(rename = "corrupted_path")]
    path: PathBuf,
    kind: CorruptionKind,
    expected: Option<String>,
    actual: Option<String>,
    detected_at: DateTime<Utc>,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

impl CorruptionEvidence {
    pub fn new(path: impl Into<PathBuf>, kind: CorruptionKind) -> Self {
        Self {
            path: path.into(),
            kind,
            expected: None,
            actual: None,
            detected_at: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> CorruptionKind {
        self.kind
    }

    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

impl std::fmt::Display for CorruptionEvidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.path.display())?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {}", expected)?;
            match &self.actual {
                Some(actual) => write!(f, ", got {})", actual)?,
                None => write!(f, ")")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&CorruptionKind::HashMismatch).unwrap();
        assert_eq!(json, "\"hash_mismatch\"");
    }

    #[test]
    fn test_evidence_json_uses_corrupted_path() {
        let evidence = CorruptionEvidence::new("/s/a.json", CorruptionKind::PartialWrite)
            .with_expected(">= 1 bytes")
            .with_actual("0 bytes");

        let value = serde_json::to_value(&evidence).unwrap();
        assert_eq!(value["corrupted_path"], "/s/a.json");
        assert_eq!(value["kind"], "partial_write");

        let back: CorruptionEvidence = serde_json::from_value(value).unwrap();
        assert_eq!(back, evidence);
    }

    #[test]
    fn test_display() {
        let evidence = CorruptionEvidence::new("x", CorruptionKind::HashMismatch)
            .with_expected("aa")
            .with_actual("bb");
        assert_eq!(evidence.to_string(), "hash_mismatch at x (expected aa, got bb)");
    }
}
