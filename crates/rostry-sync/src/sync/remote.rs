//! Remote document store port.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::models::{EntityType, PullCursor};

/// Batch push/pull access to the remote document service.
///
/// Records travel as JSON in the domain's own schema. Every call may fail
/// with a classified [`RemoteError`]; callers isolate failures per call.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert records, returning how many the remote accepted
    async fn push(&self, entity_type: &EntityType, records: Vec<Value>)
        -> Result<usize, RemoteError>;

    /// Delete records by id, returning how many were removed
    async fn delete(&self, entity_type: &EntityType, ids: Vec<String>)
        -> Result<usize, RemoteError>;

    /// Records ordered by `(updatedAt, id)` that come after `after` (see
    /// [`PullCursor::admits`]), at most `limit` of them
    async fn fetch_updated(
        &self,
        entity_type: &EntityType,
        after: &PullCursor,
        limit: usize,
    ) -> Result<Vec<Value>, RemoteError>;
}
