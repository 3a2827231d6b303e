//! Atomic write primitives
//!
//! Temp file in the target directory, fsync, rename, parent directory fsync.
//! A reader sees either the previous content of the target or the complete
//! new content, never a prefix.

mod handle;
mod writer;

pub use handle::StreamingWriteHandle;
pub use writer::{read_atomic, write_atomic, AtomicFileWriter};
