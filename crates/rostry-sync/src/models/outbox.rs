//! Outbox (write journal) model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::EntityType;
use crate::error::{IssueClass, RemoteErrorKind};

/// A unique identifier for an outbox entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxEntryId(Uuid);

impl OutboxEntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OutboxEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of an outbox entry.
///
/// `Pending -> InProgress -> Completed`, or back to `Pending` after a
/// transient failure, or `Failed` once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown outbox status '{other}'")),
        }
    }
}

/// Kind of mutation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxOperation {
    Create,
    Update,
    Delete,
}

impl OutboxOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for OutboxOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown outbox operation '{other}'")),
        }
    }
}

/// Drain priority, used only when the prioritized drain order is configured.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutboxPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl OutboxPriority {
    pub const fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    pub const fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=0 => Self::Low,
            1 => Self::Normal,
            _ => Self::High,
        }
    }
}

/// A mutation to be written into the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub user_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OutboxOperation,
    /// Snapshot of the entity at enqueue time
    pub payload: serde_json::Value,
    pub priority: OutboxPriority,
}

impl NewOutboxEntry {
    pub fn new(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: OutboxOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            payload,
            priority: OutboxPriority::Normal,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: OutboxPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// One journalled local mutation awaiting remote acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub user_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OutboxOperation,
    pub payload: serde_json::Value,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_attempt_at: Option<i64>,
    pub priority: OutboxPriority,
    pub last_error: Option<String>,
    pub error_kind: Option<RemoteErrorKind>,
}

impl OutboxEntry {
    /// Materialize a pending entry from a draft.
    pub fn from_draft(draft: NewOutboxEntry, created_at: i64) -> Self {
        Self {
            id: OutboxEntryId::new(),
            user_id: draft.user_id,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            operation: draft.operation,
            payload: draft.payload,
            created_at,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            priority: draft.priority,
            last_error: None,
            error_kind: None,
        }
    }
}

/// A failed entry as presented on the sync issues list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub entry: OutboxEntry,
    pub class: IssueClass,
    pub message: String,
}

impl From<OutboxEntry> for SyncIssue {
    fn from(entry: OutboxEntry) -> Self {
        let class = entry
            .error_kind
            .map_or(IssueClass::Unknown, RemoteErrorKind::issue_class);
        let message = entry
            .last_error
            .clone()
            .unwrap_or_else(|| "Sync failed".to_string());
        Self {
            entry,
            class,
            message,
        }
    }
}
