//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::entity::EntityType;

/// A dirty local entity that collided with a newer remote version.
///
/// Conflicts are not persisted; they travel on the conflict stream until the
/// user resolves them. The snapshots let the resolution screen commit either
/// side without another remote round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Every mutable field whose values differ
    pub conflicting_fields: Vec<String>,
    /// Local row's timestamp when the conflict was detected
    pub local_timestamp: i64,
    /// Incoming remote row's timestamp
    pub remote_timestamp: i64,
    pub local: serde_json::Value,
    pub remote: serde_json::Value,
}

/// Which side of a conflict the user chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}
