#![allow(clippy::unwrap_used, clippy::expect_used)]

use evidex_core::errors::{ExError, ExErrorKind, StorageError};
use evidex_core::logging_facility::test_capture::init_test_capture;
use evidex_core::{log_op_end, log_op_error, log_op_start};
use evidex_core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use std::path::PathBuf;

#[test]
fn test_log_op_start_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_start_unique_1";

    log_op_start!(op_name);

    let start_events = capture.count_events(|e| {
        e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_START)
    });
    assert!(start_events >= 1, "Should have captured a start event");
}

#[test]
fn test_log_op_end_carries_duration() {
    let capture = init_test_capture();
    let op_name = "test_log_op_end_unique_2";

    log_op_end!(op_name, duration_ms = 42);

    let end_events: Vec<_> = capture
        .events_for_op(op_name)
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END))
        .collect();

    assert_eq!(end_events.len(), 1, "Should have exactly one end event");
    assert_eq!(end_events[0].field("duration_ms"), Some("42"));
}

#[test]
fn test_log_op_error_includes_stable_code() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_3";

    let err = StorageError::BackupNotFound {
        backup_id: "backup-1".to_string(),
    };
    log_op_error!(op_name, err, duration_ms = 10);

    let error_event = capture
        .events_for_op(op_name)
        .into_iter()
        .find(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
        .expect("Should have error event");

    assert_eq!(error_event.err_code(), Some("ERR_NOT_FOUND"));
    assert_eq!(capture.error_codes(op_name), vec!["ERR_NOT_FOUND".to_string()]);
}

#[test]
fn test_error_macro_leaves_error_usable() {
    let capture = init_test_capture();
    let op_name = "test_error_macro_reuse_unique_4";

    let err = StorageError::ConcurrentWrite {
        path: PathBuf::from("observations/a.observation.json"),
        holder_pid: Some(1),
        waited_ms: 30_000,
    };
    log_op_error!(op_name, err, duration_ms = 30_000, path = "a");

    let ex_err: ExError = err.into();
    assert_eq!(ex_err.kind(), ExErrorKind::Concurrency);

    capture.assert_event_exists(op_name, EVENT_END_ERROR);
    let event = capture
        .events_for_op(op_name)
        .into_iter()
        .next()
        .expect("event");
    assert_eq!(event.field("path"), Some("a"));
}

#[test]
fn test_boundary_ownership_single_start_end() {
    let capture = init_test_capture();
    let op_name = "test_boundary_ownership_unique_5";

    log_op_start!(op_name, session_id = "s1");
    log_op_end!(op_name, duration_ms = 3);

    let summary = capture.op_summary(op_name, None);
    assert_eq!(summary.starts, 1, "Should have exactly one start event");
    assert_eq!(summary.ends, 1, "Should have exactly one end event");
    assert!(summary.is_balanced());
}

#[test]
fn test_summary_filters_on_record_id() {
    let capture = init_test_capture();
    let op_name = "test_summary_filter_unique_7";

    log_op_start!(op_name, record_id = "ses_a");
    log_op_start!(op_name, record_id = "ses_b");
    log_op_end!(op_name, duration_ms = 1, record_id = "ses_a");

    let a = capture.op_summary(op_name, Some(("record_id", "ses_a")));
    let b = capture.op_summary(op_name, Some(("record_id", "ses_b")));
    assert!(a.is_balanced());
    assert!(!b.is_balanced());
}

#[test]
fn test_log_macros_with_multiple_fields() {
    let capture = init_test_capture();
    let op_name = "test_log_macros_fields_unique_6";

    log_op_start!(op_name, session_id = "s-123", files_processed = 7u64);

    let start_event = capture
        .events_for_op(op_name)
        .into_iter()
        .next()
        .expect("Should have start event");

    assert_eq!(start_event.session_id(), Some("s-123"));
    assert_eq!(start_event.field("files_processed"), Some("7"));
}

#[test]
#[should_panic(expected = "no nonexistent_op_truly_unique_999/start event")]
fn test_test_capture_assert_event_exists_fails() {
    let capture = init_test_capture();

    // This should panic because no such event exists
    capture.assert_event_exists("nonexistent_op_truly_unique_999", EVENT_START);
}
