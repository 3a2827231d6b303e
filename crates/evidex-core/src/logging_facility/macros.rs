//! `log_op_start!`, `log_op_end!` and `log_op_error!`
//!
//! All three expand to a single tracing event carrying `component`, `op`
//! and `event`; extra `key = value` fields are passed through untouched.

#[doc(hidden)]
#[macro_export]
macro_rules! __evidex_op_event {
    ($level:ident, $op:expr, $event:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = module_path!(),
            op = $op,
            event = $event
            $(, $($field)*)?
        )
    };
}

/// ```
/// # use evidex_core::log_op_start;
/// log_op_start!("write_record");
/// log_op_start!("write_record", session_id = "s1", record_id = "obs_1");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {{
        $crate::__evidex_op_event!(
            info,
            $op,
            $crate::logging_facility::macros::schema::EVENT_START
            $(, $($field)*)?
        );
    }};
}

/// ```
/// # use evidex_core::log_op_end;
/// log_op_end!("create_backup", duration_ms = 42, file_count = 3u64);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        $crate::__evidex_op_event!(
            info,
            $op,
            $crate::logging_facility::macros::schema::EVENT_END,
            duration_ms = $duration
            $(, $($field)*)?
        );
    }};
}

/// Terminal error event with `err_kind` and the stable `err_code`
///
/// `$err` is cloned before conversion, so the caller still owns it.
///
/// ```
/// # use evidex_core::{log_op_error, errors::StorageError};
/// let err = StorageError::BackupNotFound { backup_id: "b1".to_string() };
/// log_op_error!("restore_backup", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.clone().into();
        $crate::__evidex_op_event!(
            error,
            $op,
            $crate::logging_facility::macros::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code()
            $(, $($field)*)?
        );
    }};
}

#[doc(hidden)]
pub use evidex_core_types::schema;
