//! Session record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Persistent metadata for one conversational session.
///
/// `message_count` is a lifetime counter: it tracks every turn ever recorded
/// and never decreases, even when the history log is cleared or trimmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session ID (UUID v4), immutable once created
    pub session_id: String,
    /// Caller-supplied owner identifier; not validated or authenticated
    pub owner_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp; refreshed on every recorded turn
    pub last_active_at: DateTime<Utc>,
    /// Lifetime count of recorded turns
    pub message_count: u64,
    /// Caller-defined annotations
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionRecord {
    /// Create a new record with a fresh ID and zero message count.
    pub fn new(owner_id: Option<&str>, metadata: Option<Map<String, Value>>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.map(str::to_string),
            created_at: now,
            last_active_at: now,
            message_count: 0,
            metadata: metadata.unwrap_or_default(),
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Count one recorded turn and refresh the activity timestamp.
    pub fn record_turn(&mut self) {
        self.message_count += 1;
        self.touch();
    }
}

/// Partial update for a session record.
///
/// `None` fields are left untouched; `metadata` entries are merged key-wise
/// into the stored map rather than replacing it wholesale.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// Replace the owner identifier
    pub owner_id: Option<String>,
    /// Merge these entries into the stored metadata
    pub metadata: Option<Map<String, Value>>,
}

impl SessionPatch {
    /// Apply the patch to a record in place.
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(ref owner) = self.owner_id {
            record.owner_id = Some(owner.clone());
        }
        if let Some(ref entries) = self.metadata {
            for (key, value) in entries {
                record.metadata.insert(key.clone(), value.clone());
            }
        }
    }

    /// Set the owner field.
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set the metadata entries to merge.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
