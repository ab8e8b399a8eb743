//! Shared sync state types.

use serde::{Deserialize, Serialize};

/// Sync badge state published by the sync manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Offline,
    Error,
}
