//! Position in a domain's remote change feed.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Last remote record applied from a domain's feed.
///
/// The feed is ordered by `(updatedAt, id)`, so rows sharing a timestamp are
/// split across pages without being skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullCursor {
    pub updated_at: i64,
    /// `None` means every record at `updated_at` was already applied
    pub entity_id: Option<String>,
}

impl PullCursor {
    pub fn new(updated_at: i64, entity_id: impl Into<String>) -> Self {
        Self {
            updated_at,
            entity_id: Some(entity_id.into()),
        }
    }

    /// Whether a record at `(updated_at, entity_id)` comes after this cursor
    pub fn admits(&self, updated_at: i64, entity_id: &str) -> bool {
        match updated_at.cmp(&self.updated_at) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self
                .entity_id
                .as_deref()
                .is_some_and(|last| entity_id > last),
        }
    }

    /// Move forward to `(updated_at, entity_id)` if that is further along
    pub fn advance(&mut self, updated_at: i64, entity_id: &str) {
        if self.admits(updated_at, entity_id) {
            *self = Self::new(updated_at, entity_id);
        }
    }
}
