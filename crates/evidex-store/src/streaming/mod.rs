//! Streaming observation sessions
//!
//! For scans too large to hold in memory: one record per file, a periodic
//! manifest checkpoint, and resume from the newest incomplete manifest.

mod manifest;
mod session;

pub use manifest::StreamingManifest;
pub use session::{list_resumable, StreamingObservationSession, BOUNDARY_CROSSING_KIND};
