use crate::corruption::{JsonSchemaCheck, JsonType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Progress record of one streaming session
///
/// `complete` flips to true exactly once, on graceful close. A manifest
/// left with `complete == false` is a resume point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingManifest {
    pub manifest_id: String,
    pub session_id: String,
    pub observation_ids: Vec<String>,
    #[serde(default)]
    pub boundary_crossings: Vec<Value>,
    pub files_processed: u64,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub complete: bool,
}

impl StreamingManifest {
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            manifest_id: format!("{}-{}", session_id, uuid::Uuid::now_v7().simple()),
            session_id: session_id.to_string(),
            observation_ids: Vec::new(),
            boundary_crossings: Vec::new(),
            files_processed: 0,
            started_at: now,
            last_updated_at: now,
            ended_at: None,
            complete: false,
        }
    }

    /// Structural check used by storage verification
    pub fn schema_check() -> JsonSchemaCheck {
        JsonSchemaCheck::new()
            .require_type("manifest_id", JsonType::String)
            .require_type("session_id", JsonType::String)
            .require_type("observation_ids", JsonType::Array)
            .require_type("files_processed", JsonType::Number)
            .require_type("complete", JsonType::Bool)
    }

    /// Whether the manifest's counters agree with each other
    pub(crate) fn consistency_error(&self) -> Option<String> {
        if (self.observation_ids.len() as u64) > self.files_processed {
            return Some(format!(
                "{} observation ids recorded for {} processed files",
                self.observation_ids.len(),
                self.files_processed
            ));
        }
        if self.last_updated_at < self.started_at {
            return Some("last update precedes session start".to_string());
        }
        None
    }
}
