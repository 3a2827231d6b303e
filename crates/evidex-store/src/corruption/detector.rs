use crate::checksum::{record_checksum, sha256_hex, CHECKSUM_FIELD};
use crate::corruption::{CorruptionEvidence, CorruptionKind, CorruptionMarker};
use crate::errors::{io_error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// JSON value categories checked by [`JsonSchemaCheck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Bool,
}

impl JsonType {
    fn of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Bool => "bool",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        JsonType::of(value) == self.name()
    }
}

/// Structural expectations for a JSON document
#[derive(Debug, Clone, Default)]
pub struct JsonSchemaCheck {
    required: Vec<String>,
    types: Vec<(String, JsonType)>,
    version: Option<(String, Vec<u64>)>,
}

impl JsonSchemaCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Require `field` and check its JSON type
    pub fn require_type(mut self, field: impl Into<String>, ty: JsonType) -> Self {
        let field = field.into();
        self.required.push(field.clone());
        self.types.push((field, ty));
        self
    }

    /// Require a numeric version field whose value is one of `supported`
    pub fn version_field(mut self, field: impl Into<String>, supported: &[u64]) -> Self {
        self.version = Some((field.into(), supported.to_vec()));
        self
    }

    /// Check applied to every record envelope written by the coordinator
    pub fn evidence_record() -> Self {
        Self::new()
            .require_type("id", JsonType::String)
            .require_type("kind", JsonType::String)
            .require_type("session_id", JsonType::String)
            .require_type("written_at", JsonType::String)
            .require("payload")
            .require_type(CHECKSUM_FIELD, JsonType::String)
            .version_field("schema_version", &[crate::transaction::RECORD_SCHEMA_VERSION])
    }
}

/// Stateless verification routines
///
/// Every check returns `Ok(None)` when nothing is wrong and
/// `Ok(Some(evidence))` when it finds corruption. `Err` is reserved for
/// I/O failures while checking. Nothing here modifies the inspected files.
pub struct CorruptionDetector;

impl CorruptionDetector {
    /// Compare the SHA-256 of a file against an expected hex digest
    pub fn verify_hash(path: &Path, expected: &str) -> Result<Option<CorruptionEvidence>> {
        let bytes = fs::read(path).map_err(|e| io_error("verify_hash", path, e))?;
        Ok(Self::verify_bytes_hash(path, &bytes, expected))
    }

    /// Compare the SHA-256 of in-memory bytes against an expected hex digest
    pub fn verify_bytes_hash(
        label: impl AsRef<Path>,
        bytes: &[u8],
        expected: &str,
    ) -> Option<CorruptionEvidence> {
        let actual = sha256_hex(bytes);
        if actual.eq_ignore_ascii_case(expected) {
            return None;
        }
        Some(
            CorruptionEvidence::new(label.as_ref(), CorruptionKind::HashMismatch)
                .with_expected(expected)
                .with_actual(actual),
        )
    }

    /// Heuristics for a write that stopped early
    ///
    /// Flags files shorter than `min_expected_size`, and text files ending in
    /// NUL padding (what a torn write leaves behind on some filesystems).
    pub fn detect_partial_write(
        path: &Path,
        min_expected_size: u64,
    ) -> Result<Option<CorruptionEvidence>> {
        let len = fs::metadata(path)
            .map_err(|e| io_error("detect_partial_write", path, e))?
            .len();
        if len < min_expected_size {
            return Ok(Some(
                CorruptionEvidence::new(path, CorruptionKind::PartialWrite)
                    .with_expected(format!(">= {} bytes", min_expected_size))
                    .with_actual(format!("{} bytes", len)),
            ));
        }

        let bytes = fs::read(path).map_err(|e| io_error("detect_partial_write", path, e))?;
        let trailing_nuls = bytes.iter().rev().take_while(|b| **b == 0).count();
        if trailing_nuls == 0 || trailing_nuls == bytes.len() {
            return Ok(None);
        }
        let body = &bytes[..bytes.len() - trailing_nuls];
        if body.contains(&0) || std::str::from_utf8(body).is_err() {
            return Ok(None);
        }
        Ok(Some(
            CorruptionEvidence::new(path, CorruptionKind::PartialWrite)
                .with_expected("text without trailing NUL bytes")
                .with_actual(format!("{} trailing NUL bytes", trailing_nuls))
                .with_context("file_size", len.to_string()),
        ))
    }

    /// Parse a JSON file and check it against `check`
    ///
    /// Reports the first problem found, in order: parse error, non-object
    /// top level, missing field, wrong field type, unsupported version.
    pub fn verify_json_structure(
        path: &Path,
        check: &JsonSchemaCheck,
    ) -> Result<Option<CorruptionEvidence>> {
        let bytes = fs::read(path).map_err(|e| io_error("verify_json_structure", path, e))?;
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Some(
                    CorruptionEvidence::new(path, CorruptionKind::ParseError)
                        .with_expected("valid JSON")
                        .with_actual(e.to_string()),
                ))
            }
        };
        Ok(Self::check_value(path, &value, check))
    }

    fn check_value(
        path: &Path,
        value: &Value,
        check: &JsonSchemaCheck,
    ) -> Option<CorruptionEvidence> {
        let map = match value.as_object() {
            Some(map) => map,
            None => {
                return Some(
                    CorruptionEvidence::new(path, CorruptionKind::SchemaMismatch)
                        .with_expected("object")
                        .with_actual(JsonType::of(value)),
                )
            }
        };

        let missing: Vec<&str> = check
            .required
            .iter()
            .map(String::as_str)
            .filter(|f| !map.contains_key(*f))
            .collect();
        if let Some(first) = missing.first() {
            return Some(
                CorruptionEvidence::new(path, CorruptionKind::MissingField)
                    .with_expected(*first)
                    .with_actual("absent")
                    .with_context("missing_fields", missing.join(",")),
            );
        }

        for (field, ty) in &check.types {
            if let Some(v) = map.get(field) {
                if !ty.matches(v) {
                    return Some(
                        CorruptionEvidence::new(path, CorruptionKind::TypeMismatch)
                            .with_expected(ty.name())
                            .with_actual(JsonType::of(v))
                            .with_context("field", field.clone()),
                    );
                }
            }
        }

        if let Some((field, supported)) = &check.version {
            let supported_text = supported
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join("|");
            match map.get(field) {
                None => {
                    return Some(
                        CorruptionEvidence::new(path, CorruptionKind::MissingField)
                            .with_expected(field.clone())
                            .with_actual("absent")
                            .with_context("missing_fields", field.clone()),
                    )
                }
                Some(v) => {
                    let ok = v.as_u64().map(|n| supported.contains(&n)).unwrap_or(false);
                    if !ok {
                        return Some(
                            CorruptionEvidence::new(path, CorruptionKind::VersionMismatch)
                                .with_expected(supported_text)
                                .with_actual(v.to_string())
                                .with_context("field", field.clone()),
                        );
                    }
                }
            }
        }

        None
    }

    /// Check that a binary file starts with `magic`
    pub fn verify_binary_header(path: &Path, magic: &[u8]) -> Result<Option<CorruptionEvidence>> {
        let mut file = fs::File::open(path).map_err(|e| io_error("verify_binary_header", path, e))?;
        let mut head = Vec::with_capacity(magic.len());
        file.by_ref()
            .take(magic.len() as u64)
            .read_to_end(&mut head)
            .map_err(|e| io_error("verify_binary_header", path, e))?;

        if head.len() < magic.len() {
            return Ok(Some(
                CorruptionEvidence::new(path, CorruptionKind::SizeMismatch)
                    .with_expected(format!(">= {} bytes", magic.len()))
                    .with_actual(format!("{} bytes", head.len())),
            ));
        }
        if head != magic {
            return Ok(Some(
                CorruptionEvidence::new(path, CorruptionKind::SchemaMismatch)
                    .with_expected(hex::encode(magic))
                    .with_actual(hex::encode(&head))
                    .with_context("check", "binary_header"),
            ));
        }
        Ok(None)
    }

    /// Check a directory against an expected file set and hash manifest
    ///
    /// `expected_hashes` maps paths relative to `dir` onto SHA-256 hex
    /// digests. Returns every finding, not just the first.
    pub fn verify_directory_integrity(
        dir: &Path,
        expected_files: &[&str],
        expected_hashes: &BTreeMap<String, String>,
    ) -> Result<Vec<CorruptionEvidence>> {
        if !dir.is_dir() {
            return Err(io_error(
                "verify_directory_integrity",
                dir,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let mut findings = Vec::new();
        for name in expected_files {
            let path = dir.join(name);
            if !path.is_file() {
                findings.push(
                    CorruptionEvidence::new(&path, CorruptionKind::MissingField)
                        .with_expected(*name)
                        .with_actual("absent")
                        .with_context("check", "directory_integrity"),
                );
            }
        }

        for (name, expected) in expected_hashes {
            let path = dir.join(name);
            if !path.is_file() {
                if !expected_files.contains(&name.as_str()) {
                    findings.push(
                        CorruptionEvidence::new(&path, CorruptionKind::MissingField)
                            .with_expected(name.clone())
                            .with_actual("absent")
                            .with_context("check", "directory_integrity"),
                    );
                }
                continue;
            }
            if let Some(evidence) = Self::verify_hash(&path, expected)? {
                findings.push(evidence);
            }
        }

        Ok(findings)
    }

    /// Recompute the checksum of a record envelope
    pub fn verify_record_checksum(label: impl AsRef<Path>, record: &Value) -> Option<CorruptionEvidence> {
        let stored = match record.get(CHECKSUM_FIELD).and_then(Value::as_str) {
            Some(s) => s,
            None => {
                return Some(
                    CorruptionEvidence::new(label.as_ref(), CorruptionKind::MissingField)
                        .with_expected(CHECKSUM_FIELD)
                        .with_actual("absent"),
                )
            }
        };
        let actual = record_checksum(record);
        if actual == stored {
            None
        } else {
            Some(
                CorruptionEvidence::new(label.as_ref(), CorruptionKind::HashMismatch)
                    .with_expected(stored)
                    .with_actual(actual)
                    .with_context("check", "record_checksum"),
            )
        }
    }

    /// Evidence for a path that already carries a corruption marker
    pub fn check_marker(path: &Path) -> Result<Option<CorruptionEvidence>> {
        if !CorruptionMarker::exists(path) {
            return Ok(None);
        }
        let marker_path = CorruptionMarker::marker_path_for(path);
        let mut evidence = CorruptionEvidence::new(path, CorruptionKind::ExplicitMarker)
            .with_expected("no corruption marker")
            .with_actual(marker_path.display().to_string());
        match CorruptionMarker::load(path) {
            Ok(Some(marker)) => {
                evidence = evidence.with_context("marked_kind", marker.evidence().kind().as_str());
            }
            Ok(None) => {}
            Err(e) => {
                evidence = evidence.with_context("marker_error", e.to_string());
            }
        }
        Ok(Some(evidence))
    }
}
