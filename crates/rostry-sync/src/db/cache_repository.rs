//! Entity cache repository implementation
//!
//! Rows are stored as JSON documents keyed by `(entity_type, entity_id)`.
//! The typed helpers decode them through [`SyncEntity`].

use crate::error::Result;
use crate::models::{CacheEntry, EntityType, SyncEntity};
use crate::util::sql_limit;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// A cached row together with its key
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub entity_id: String,
    pub entry: CacheEntry<Value>,
}

/// Trait for local cache storage operations
pub trait CacheRepository {
    /// Find a row by key
    fn get(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<CacheEntry<Value>>>;

    /// Insert or replace a row
    fn upsert(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        entry: &CacheEntry<Value>,
    ) -> Result<()>;

    /// Rows updated strictly after `since`, oldest first
    fn updated_since(
        &self,
        entity_type: &EntityType,
        since: i64,
        limit: usize,
    ) -> Result<Vec<CacheRecord>>;

    /// Dirty rows, oldest first, conflicted rows included
    fn list_dirty(&self, entity_type: &EntityType, limit: usize) -> Result<Vec<CacheRecord>>;

    /// Clear the dirty flag on rows that still match the given snapshots.
    /// Rows written since the snapshot was read stay dirty.
    fn mark_clean(&self, entity_type: &EntityType, records: &[CacheRecord]) -> Result<usize>;

    /// Set or clear the conflict marker
    fn set_conflicted(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        conflicted: bool,
    ) -> Result<bool>;

    fn delete(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool>;

    /// Typed lookup
    fn get_typed<T: SyncEntity>(&self, entity_id: &str) -> Result<Option<CacheEntry<T>>>
    where
        Self: Sized,
    {
        self.get(&T::entity_type(), entity_id)?
            .map(decode_entry)
            .transpose()
    }

    /// Typed insert-or-replace
    fn upsert_typed<T: SyncEntity>(&self, entry: &CacheEntry<T>) -> Result<()>
    where
        Self: Sized,
    {
        let encoded = CacheEntry {
            data: serde_json::to_value(&entry.data)?,
            dirty: entry.dirty,
            conflicted: entry.conflicted,
            updated_at: entry.updated_at,
        };
        self.upsert(&T::entity_type(), entry.data.id(), &encoded)
    }
}

/// Decode a JSON cache row into its typed form
pub fn decode_entry<T: SyncEntity>(entry: CacheEntry<Value>) -> Result<CacheEntry<T>> {
    Ok(CacheEntry {
        data: serde_json::from_value(entry.data)?,
        dirty: entry.dirty,
        conflicted: entry.conflicted,
        updated_at: entry.updated_at,
    })
}

/// `SQLite` implementation of `CacheRepository`
pub struct SqliteCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry<Value>> {
        Ok(CacheEntry {
            data: row.get(0)?,
            dirty: row.get(1)?,
            conflicted: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRecord> {
        Ok(CacheRecord {
            entry: Self::parse_entry(row)?,
            entity_id: row.get(4)?,
        })
    }
}

impl CacheRepository for SqliteCacheRepository<'_> {
    fn get(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<CacheEntry<Value>>> {
        let entry = self
            .conn
            .query_row(
                "SELECT data, dirty, conflicted, updated_at FROM entity_cache
                 WHERE entity_type = ? AND entity_id = ?",
                params![entity_type.as_str(), entity_id],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        entry: &CacheEntry<Value>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entity_cache (entity_type, entity_id, data, dirty, conflicted, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                data = excluded.data,
                dirty = excluded.dirty,
                conflicted = excluded.conflicted,
                updated_at = excluded.updated_at",
            params![
                entity_type.as_str(),
                entity_id,
                entry.data,
                entry.dirty,
                entry.conflicted,
                entry.updated_at
            ],
        )?;
        Ok(())
    }

    fn updated_since(
        &self,
        entity_type: &EntityType,
        since: i64,
        limit: usize,
    ) -> Result<Vec<CacheRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT data, dirty, conflicted, updated_at, entity_id FROM entity_cache
             WHERE entity_type = ? AND updated_at > ?
             ORDER BY updated_at ASC, entity_id ASC
             LIMIT ?",
        )?;
        let records = stmt
            .query_map(
                params![entity_type.as_str(), since, sql_limit(limit)],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_dirty(&self, entity_type: &EntityType, limit: usize) -> Result<Vec<CacheRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT data, dirty, conflicted, updated_at, entity_id FROM entity_cache
             WHERE entity_type = ? AND dirty = 1
             ORDER BY updated_at ASC, entity_id ASC
             LIMIT ?",
        )?;
        let records = stmt
            .query_map(
                params![entity_type.as_str(), sql_limit(limit)],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn mark_clean(&self, entity_type: &EntityType, records: &[CacheRecord]) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE entity_cache SET dirty = 0
             WHERE entity_type = ? AND entity_id = ? AND updated_at = ? AND data = ?",
        )?;
        let mut updated = 0;
        for record in records {
            updated += stmt.execute(params![
                entity_type.as_str(),
                record.entity_id,
                record.entry.updated_at,
                record.entry.data,
            ])?;
        }
        Ok(updated)
    }

    fn set_conflicted(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        conflicted: bool,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE entity_cache SET conflicted = ? WHERE entity_type = ? AND entity_id = ?",
            params![conflicted, entity_type.as_str(), entity_id],
        )?;
        Ok(rows > 0)
    }

    fn delete(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM entity_cache WHERE entity_type = ? AND entity_id = ?",
            params![entity_type.as_str(), entity_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Product;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(name: &str, updated_at: i64, dirty: bool) -> CacheEntry<Value> {
        CacheEntry {
            data: json!({ "name": name }),
            dirty,
            conflicted: false,
            updated_at,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCacheRepository::new(db.connection());

        repo.upsert(&EntityType::Product, "p1", &row("first", 1, true))
            .unwrap();
        repo.upsert(&EntityType::Product, "p1", &row("second", 2, false))
            .unwrap();

        let fetched = repo.get(&EntityType::Product, "p1").unwrap().unwrap();
        assert_eq!(fetched, row("second", 2, false));
        assert!(repo.get(&EntityType::Order, "p1").unwrap().is_none());
    }

    #[test]
    fn test_updated_since_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCacheRepository::new(db.connection());

        for (id, ts) in [("a", 10), ("b", 20), ("c", 30)] {
            repo.upsert(&EntityType::Order, id, &row(id, ts, false))
                .unwrap();
        }

        let ids: Vec<String> = repo
            .updated_since(&EntityType::Order, 10, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.entity_id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(repo.updated_since(&EntityType::Order, 0, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_dirty_and_conflict_flags() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCacheRepository::new(db.connection());

        repo.upsert(&EntityType::User, "u1", &row("dirty", 1, true))
            .unwrap();
        repo.upsert(&EntityType::User, "u2", &row("clean", 2, false))
            .unwrap();

        let dirty = repo.list_dirty(&EntityType::User, 10).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].entity_id, "u1");

        assert!(repo.set_conflicted(&EntityType::User, "u1", true).unwrap());
        assert!(repo.get(&EntityType::User, "u1").unwrap().unwrap().conflicted);

        assert_eq!(repo.mark_clean(&EntityType::User, &dirty).unwrap(), 1);
        assert!(repo.list_dirty(&EntityType::User, 10).unwrap().is_empty());

        assert!(repo.delete(&EntityType::User, "u2").unwrap());
        assert!(!repo.delete(&EntityType::User, "u2").unwrap());
    }

    #[test]
    fn mark_clean_skips_rows_edited_after_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCacheRepository::new(db.connection());

        repo.upsert(&EntityType::Product, "p1", &row("pushed", 1, true))
            .unwrap();
        repo.upsert(&EntityType::Product, "p2", &row("pushed", 1, true))
            .unwrap();
        let snapshot = repo.list_dirty(&EntityType::Product, 10).unwrap();

        // p1 is edited again while the push is in flight
        repo.upsert(&EntityType::Product, "p1", &row("edited", 2, true))
            .unwrap();

        assert_eq!(repo.mark_clean(&EntityType::Product, &snapshot).unwrap(), 1);
        let still_dirty = repo.list_dirty(&EntityType::Product, 10).unwrap();
        assert_eq!(still_dirty.len(), 1);
        assert_eq!(still_dirty[0].entity_id, "p1");
        assert_eq!(still_dirty[0].entry.data, json!({ "name": "edited" }));
    }

    #[test]
    fn mark_clean_runs_inside_caller_transaction() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        SqliteCacheRepository::new(conn)
            .upsert(&EntityType::Order, "o1", &row("dirty", 1, true))
            .unwrap();

        let tx = conn.unchecked_transaction().unwrap();
        let repo = SqliteCacheRepository::new(&tx);
        let dirty = repo.list_dirty(&EntityType::Order, 10).unwrap();
        assert_eq!(repo.mark_clean(&EntityType::Order, &dirty).unwrap(), 1);
        tx.commit().unwrap();

        assert!(!SqliteCacheRepository::new(conn)
            .get(&EntityType::Order, "o1")
            .unwrap()
            .unwrap()
            .dirty);
    }

    #[test]
    fn test_typed_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCacheRepository::new(db.connection());

        let product = Product {
            id: "p1".to_string(),
            seller_id: "seller-1".to_string(),
            name: "Aseel rooster".to_string(),
            price: 1_500.0,
            quantity: 2,
            updated_at: 5,
            ..Product::default()
        };
        let entry = CacheEntry {
            data: product,
            dirty: true,
            conflicted: false,
            updated_at: 5,
        };
        repo.upsert_typed(&entry).unwrap();

        let fetched = repo.get_typed::<Product>("p1").unwrap().unwrap();
        assert_eq!(fetched, entry);
    }
}
