//! Field and event names shared by the logging macros, the test capture
//! layer and anything that parses Evidex's JSON logs.

/// Module path of the emitting code
pub const FIELD_COMPONENT: &str = "component";
/// Operation name, e.g. `write_record`
pub const FIELD_OP: &str = "op";
/// One of [`EVENT_START`], [`EVENT_END`], [`EVENT_END_ERROR`]
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

pub const FIELD_INVESTIGATION_ID: &str = "investigation_id";
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_RECORD_ID: &str = "record_id";
pub const FIELD_RECORD_KIND: &str = "record_kind";
pub const FIELD_MANIFEST_ID: &str = "manifest_id";
pub const FIELD_BACKUP_ID: &str = "backup_id";
pub const FIELD_PATH: &str = "path";

pub const FIELD_FILES_PROCESSED: &str = "files_processed";
pub const FIELD_FILE_COUNT: &str = "file_count";
pub const FIELD_RSS_MB: &str = "rss_mb";

/// Debug rendering of the `ExErrorKind`
pub const FIELD_ERR_KIND: &str = "err_kind";
/// Stable `ERR_*` code
pub const FIELD_ERR_CODE: &str = "err_code";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

/// Every terminal event name
pub const TERMINAL_EVENTS: [&str; 2] = [EVENT_END, EVENT_END_ERROR];
