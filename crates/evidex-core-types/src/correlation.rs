//! Identity types correlating stored evidence with an investigation
//!
//! Every record persisted by the store belongs to one investigation session.
//! Collaborators hand the store an [`InvestigationContext`]; the store never
//! invents investigation identities on its own.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for one investigation of a source tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvestigationId(String);

impl InvestigationId {
    /// Generate a new random InvestigationId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for InvestigationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvestigationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single observation session within an investigation
///
/// Session ids are used verbatim in file names, so generated ids only
/// contain characters that are safe on every supported filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random SessionId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity context supplied by the investigation driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationContext {
    pub investigation_id: InvestigationId,
    pub root_path: PathBuf,
    pub session_id: SessionId,
}

impl InvestigationContext {
    /// Create a context for a fresh investigation of `root_path`
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            investigation_id: InvestigationId::new(),
            root_path: root_path.into(),
            session_id: SessionId::new(),
        }
    }

    /// Replace the session id (used when resuming an earlier session)
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Root of the observed source tree
    pub fn root(&self) -> &Path {
        &self.root_path
    }
}
