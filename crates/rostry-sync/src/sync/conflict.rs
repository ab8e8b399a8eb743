//! Field-level conflict detection and partial merge.
//!
//! Both functions are pure: they read the entity's field table and never
//! touch storage.

use crate::error::Result;
use crate::models::{CacheEntry, FieldKind, SyncConflict, SyncEntity};

/// Names of the mutable fields whose values differ between `a` and `b`, in
/// field-table order.
pub fn differing_fields<T: SyncEntity>(a: &T, b: &T) -> Vec<String> {
    T::fields()
        .iter()
        .filter(|field| field.kind == FieldKind::Mutable && (field.differs)(a, b))
        .map(|field| field.name.to_string())
        .collect()
}

/// Compare a cached row with an incoming remote version.
///
/// Returns `None` when the local row is clean or no mutable field differs.
/// Fails only if either side cannot be snapshotted as JSON.
pub fn detect<T: SyncEntity>(
    local: &CacheEntry<T>,
    remote: &T,
) -> Result<Option<SyncConflict>> {
    if !local.dirty {
        return Ok(None);
    }

    let conflicting_fields = differing_fields(&local.data, remote);
    if conflicting_fields.is_empty() {
        return Ok(None);
    }

    Ok(Some(SyncConflict {
        entity_type: T::entity_type(),
        entity_id: local.data.id().to_string(),
        conflicting_fields,
        local_timestamp: local.updated_at,
        remote_timestamp: remote.updated_at(),
        local: serde_json::to_value(&local.data)?,
        remote: serde_json::to_value(remote)?,
    }))
}

/// Keep local values for mutable fields and take server-owned fields from
/// the remote copy.
pub fn partial_merge<T: SyncEntity>(local: &T, remote: &T) -> T {
    let mut merged = local.clone();
    for field in T::fields() {
        if field.kind == FieldKind::ServerOwned {
            (field.take)(&mut merged, remote);
        }
    }
    merged
}
