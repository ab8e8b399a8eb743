//! Outbox repository implementation

use std::str::FromStr;

use crate::config::DrainOrder;
use crate::error::{RemoteError, RemoteErrorKind, Result};
use crate::models::{
    EntityType, OutboxEntry, OutboxEntryId, OutboxPriority, OutboxStatus,
};
use crate::util::{compact_text, sql_limit};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const SELECT_COLUMNS: &str = "id, user_id, entity_type, entity_id, operation, payload, created_at, \
     status, retry_count, last_attempt_at, priority, last_error, error_kind";

/// Trait for write journal storage operations
pub trait OutboxRepository {
    /// Append a new entry
    fn insert(&self, entry: &OutboxEntry) -> Result<()>;

    /// Get an entry by ID
    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>>;

    /// Pending entries, oldest first
    fn get_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Pending entries, highest priority first, then oldest
    fn get_pending_prioritized(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Move up to `limit` pending entries to in-progress and return them.
    ///
    /// Each transition is a conditional update on `status = 'PENDING'`, so a
    /// row is handed to exactly one claimer.
    fn claim_pending(&self, limit: usize, order: DrainOrder, now: i64)
        -> Result<Vec<OutboxEntry>>;

    /// Move a single pending entry back to in-progress. Returns false when the
    /// entry is no longer pending.
    fn claim(&self, id: &OutboxEntryId, now: i64) -> Result<bool>;

    /// Set status and attempt timestamp. Returns false when the row is gone.
    fn update_status(&self, id: &OutboxEntryId, status: OutboxStatus, timestamp: i64)
        -> Result<bool>;

    /// Set status and attempt timestamp on many rows in one transaction
    fn update_status_batch(
        &self,
        ids: &[OutboxEntryId],
        status: OutboxStatus,
        timestamp: i64,
    ) -> Result<usize>;

    /// Store the outcome of a failed attempt
    fn record_failure(
        &self,
        id: &OutboxEntryId,
        retry_count: u32,
        status: OutboxStatus,
        error: &RemoteError,
        timestamp: i64,
    ) -> Result<bool>;

    /// Return an entry to pending with a fresh retry budget
    fn reset_retry_and_status(&self, id: &OutboxEntryId) -> Result<bool>;

    /// Return every in-progress entry to pending without touching retries
    fn release_in_progress(&self) -> Result<usize>;

    /// Entries in the given status, oldest first
    fn list_by_status(&self, status: OutboxStatus, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Pending and in-progress entries owned by a user, oldest first
    fn pending_by_user(&self, user_id: &str) -> Result<Vec<OutboxEntry>>;

    fn count_by_status(&self, status: OutboxStatus) -> Result<usize>;

    /// Whether any pending or in-progress entry targets the entity
    fn has_open_entries(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool>;

    /// Remove an entry. Returns false when it did not exist.
    fn delete(&self, id: &OutboxEntryId) -> Result<bool>;

    /// Delete completed entries last touched at or before `cutoff`.
    /// Pending, in-progress and failed rows are never removed.
    fn purge_completed_before(&self, cutoff: i64) -> Result<usize>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Parse an entry from a row selected with `SELECT_COLUMNS`
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
        let error_kind: Option<String> = row.get(12)?;
        Ok(OutboxEntry {
            id: parse_column(row, 0)?,
            user_id: row.get(1)?,
            entity_type: EntityType::from(row.get::<_, String>(2)?),
            entity_id: row.get(3)?,
            operation: parse_column(row, 4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
            status: parse_column(row, 7)?,
            retry_count: row.get(8)?,
            last_attempt_at: row.get(9)?,
            priority: OutboxPriority::from_rank(row.get(10)?),
            last_error: row.get(11)?,
            error_kind: error_kind.as_deref().and_then(RemoteErrorKind::parse),
        })
    }
}

fn parse_column<T>(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(index)?;
    raw.parse::<T>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Text,
            format!("invalid value '{raw}': {error}").into(),
        )
    })
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn insert(&self, entry: &OutboxEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO outbox (id, user_id, entity_type, entity_id, operation, payload, created_at, status, retry_count, last_attempt_at, priority, last_error, error_kind)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.id.as_str(),
                entry.user_id,
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.operation.as_str(),
                entry.payload,
                entry.created_at,
                entry.status.as_str(),
                entry.retry_count,
                entry.last_attempt_at,
                entry.priority.rank(),
                entry.last_error,
                entry.error_kind.map(RemoteErrorKind::as_str),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM outbox WHERE id = ?"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn get_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.query_entries(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE status = 'PENDING'
                 ORDER BY created_at ASC, seq ASC
                 LIMIT ?"
            ),
            params![sql_limit(limit)],
        )
    }

    fn get_pending_prioritized(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.query_entries(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE status = 'PENDING'
                 ORDER BY priority DESC, created_at ASC, seq ASC
                 LIMIT ?"
            ),
            params![sql_limit(limit)],
        )
    }

    fn claim_pending(
        &self,
        limit: usize,
        order: DrainOrder,
        now: i64,
    ) -> Result<Vec<OutboxEntry>> {
        let tx = self.conn.unchecked_transaction()?;

        let candidates = match order {
            DrainOrder::Fifo => self.get_pending(limit)?,
            DrainOrder::Prioritized => self.get_pending_prioritized(limit)?,
        };

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            let rows = tx.execute(
                "UPDATE outbox SET status = 'IN_PROGRESS', last_attempt_at = ?
                 WHERE id = ? AND status = 'PENDING'",
                params![now, entry.id.as_str()],
            )?;
            if rows == 1 {
                entry.status = OutboxStatus::InProgress;
                entry.last_attempt_at = Some(now);
                claimed.push(entry);
            }
        }

        tx.commit()?;
        Ok(claimed)
    }

    fn claim(&self, id: &OutboxEntryId, now: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outbox SET status = 'IN_PROGRESS', last_attempt_at = ?
             WHERE id = ? AND status = 'PENDING'",
            params![now, id.as_str()],
        )?;
        Ok(rows == 1)
    }

    fn update_status(
        &self,
        id: &OutboxEntryId,
        status: OutboxStatus,
        timestamp: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outbox SET status = ?, last_attempt_at = ? WHERE id = ?",
            params![status.as_str(), timestamp, id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn update_status_batch(
        &self,
        ids: &[OutboxEntryId],
        status: OutboxStatus,
        timestamp: i64,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE outbox SET status = ?, last_attempt_at = ? WHERE id = ?")?;
            for id in ids {
                updated += stmt.execute(params![status.as_str(), timestamp, id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    fn record_failure(
        &self,
        id: &OutboxEntryId,
        retry_count: u32,
        status: OutboxStatus,
        error: &RemoteError,
        timestamp: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outbox
             SET status = ?, retry_count = ?, last_attempt_at = ?, last_error = ?, error_kind = ?
             WHERE id = ?",
            params![
                status.as_str(),
                retry_count,
                timestamp,
                compact_text(&error.message),
                error.kind.as_str(),
                id.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    fn reset_retry_and_status(&self, id: &OutboxEntryId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outbox
             SET status = 'PENDING', retry_count = 0, last_error = NULL, error_kind = NULL
             WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn release_in_progress(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE outbox SET status = 'PENDING' WHERE status = 'IN_PROGRESS'",
            [],
        )?;
        Ok(rows)
    }

    fn list_by_status(&self, status: OutboxStatus, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.query_entries(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE status = ?
                 ORDER BY created_at ASC, seq ASC
                 LIMIT ?"
            ),
            params![status.as_str(), sql_limit(limit)],
        )
    }

    fn pending_by_user(&self, user_id: &str) -> Result<Vec<OutboxEntry>> {
        self.query_entries(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE user_id = ? AND status IN ('PENDING', 'IN_PROGRESS')
                 ORDER BY created_at ASC, seq ASC"
            ),
            params![user_id],
        )
    }

    fn count_by_status(&self, status: OutboxStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn has_open_entries(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM outbox
                WHERE entity_type = ? AND entity_id = ? AND status IN ('PENDING', 'IN_PROGRESS')
             )",
            params![entity_type.as_str(), entity_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn delete(&self, id: &OutboxEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM outbox WHERE id = ?", params![id.as_str()])?;
        Ok(rows > 0)
    }

    fn purge_completed_before(&self, cutoff: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM outbox
             WHERE status = 'COMPLETED' AND COALESCE(last_attempt_at, created_at) <= ?",
            params![cutoff],
        )?;
        Ok(rows)
    }
}
