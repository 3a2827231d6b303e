//! Operation logging for Evidex
//!
//! Every public storage operation is bracketed by a `start` event and one
//! terminal event (`end` or `end_error`), all tagged with `op` and the
//! emitting module. Field names live in `evidex_core_types::schema`.
//!
//! Binaries call [`init`] once; tests install [`init_test_capture`] instead
//! and assert on what was logged.
//!
//! ```rust
//! use evidex_core::logging_facility::{init, Profile};
//!
//! init(Profile::Production);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
