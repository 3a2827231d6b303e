//! Corruption detection
//!
//! Detection only: routines report evidence, markers record it, and nothing
//! in this module repairs a file. Repair is an explicit operator action on
//! the transaction coordinator.

mod detector;
mod evidence;
mod marker;

pub use detector::{CorruptionDetector, JsonSchemaCheck, JsonType};
pub use evidence::{CorruptionEvidence, CorruptionKind};
pub use marker::CorruptionMarker;
