// Integration tests for corruption detection and markers

use evidex_store::corruption::{JsonSchemaCheck, JsonType};
use evidex_store::{CorruptionDetector, CorruptionEvidence, CorruptionKind, CorruptionMarker};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_hash_mismatch_reports_both_digests() {
    // Given: A file and a digest of different content
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"actual").unwrap();
    let expected = evidex_store::checksum::sha256_hex(b"expected");

    // When: We verify the hash
    let evidence = CorruptionDetector::verify_hash(&path, &expected).unwrap().unwrap();

    // Then: Evidence names the kind and both digests
    assert_eq!(evidence.kind(), CorruptionKind::HashMismatch);
    assert_eq!(evidence.expected(), Some(expected.as_str()));
    assert_eq!(
        evidence.actual(),
        Some(evidex_store::checksum::sha256_hex(b"actual").as_str())
    );
}

#[test]
fn test_truncated_json_is_a_parse_error() {
    // Given: JSON cut off mid-document
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("record.json");
    fs::write(&path, b"{\"id\": \"ses_1\", \"payl").unwrap();

    // When: We verify its structure
    let evidence = CorruptionDetector::verify_json_structure(&path, &JsonSchemaCheck::evidence_record())
        .unwrap()
        .unwrap();

    // Then: It is reported as unparseable
    assert_eq!(evidence.kind(), CorruptionKind::ParseError);
}

#[test]
fn test_wrong_field_type_and_version() {
    // Given: A schema requiring a numeric count and version 2
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.json");
    let check = JsonSchemaCheck::new()
        .require_type("count", JsonType::Number)
        .version_field("version", &[2]);

    // When: count is a string
    fs::write(&path, br#"{"count": "7", "version": 2}"#).unwrap();
    let type_err = CorruptionDetector::verify_json_structure(&path, &check).unwrap().unwrap();

    // And: version is unsupported
    fs::write(&path, br#"{"count": 7, "version": 1}"#).unwrap();
    let version_err = CorruptionDetector::verify_json_structure(&path, &check).unwrap().unwrap();

    // Then: Each finding names its own kind
    assert_eq!(type_err.kind(), CorruptionKind::TypeMismatch);
    assert_eq!(version_err.kind(), CorruptionKind::VersionMismatch);
}

#[test]
fn test_directory_integrity_finds_missing_and_changed_files() {
    // Given: A directory with one changed file and one missing file
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), b"changed").unwrap();
    let mut hashes = BTreeMap::new();
    hashes.insert("a.json".to_string(), evidex_store::checksum::sha256_hex(b"original"));

    // When: We verify the directory
    let findings =
        CorruptionDetector::verify_directory_integrity(dir.path(), &["a.json", "b.json"], &hashes).unwrap();

    // Then: Both problems are reported
    let kinds: Vec<CorruptionKind> = findings.iter().map(|f| f.kind()).collect();
    assert!(kinds.contains(&CorruptionKind::MissingField));
    assert!(kinds.contains(&CorruptionKind::HashMismatch));
}

#[test]
fn test_marker_survives_and_is_detected() {
    // Given: A corrupted file that we mark
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, b"garbage").unwrap();
    let evidence = CorruptionEvidence::new(&path, CorruptionKind::ParseError).with_context("source", "test");
    let marker = CorruptionMarker::create(evidence).unwrap();

    // When: A later check looks at the file
    let found = CorruptionDetector::check_marker(&path).unwrap().unwrap();

    // Then: The marker is reported and lists the original finding
    assert!(marker.marker_path().exists());
    assert_eq!(found.kind(), CorruptionKind::ExplicitMarker);
    let listed = CorruptionMarker::list_in(dir.path()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].evidence().kind(), CorruptionKind::ParseError);
    assert_eq!(listed[0].evidence().context()["source"], "test");
}

#[test]
fn test_binary_header_check() {
    // Given: A file with the wrong magic bytes and one too short for it
    let dir = TempDir::new().unwrap();
    let wrong = dir.path().join("wrong.bin");
    let short = dir.path().join("short.bin");
    fs::write(&wrong, b"ABCDrest").unwrap();
    fs::write(&short, b"EV").unwrap();

    // When / Then: Each is reported with a distinct kind
    let wrong_ev = CorruptionDetector::verify_binary_header(&wrong, b"EVDX").unwrap().unwrap();
    let short_ev = CorruptionDetector::verify_binary_header(&short, b"EVDX").unwrap().unwrap();
    assert_eq!(wrong_ev.kind(), CorruptionKind::SchemaMismatch);
    assert_eq!(short_ev.kind(), CorruptionKind::SizeMismatch);
}
