//! Pull cursor repository implementation

use crate::error::Result;
use crate::models::{EntityType, PullCursor};
use rusqlite::{params, Connection, OptionalExtension};

/// Last pull position for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    /// Last remote record applied so far
    pub position: PullCursor,
    /// When the domain last finished a pull (Unix ms)
    pub last_synced_at: Option<i64>,
}

/// Trait for pull cursor storage
pub trait CursorRepository {
    /// Load the cursor for a domain, `None` if it was never pulled
    fn get(&self, domain: &EntityType) -> Result<Option<SyncCursor>>;

    /// Store the cursor for a domain
    fn set(&self, domain: &EntityType, position: &PullCursor, synced_at: i64) -> Result<()>;
}

/// `SQLite` implementation of `CursorRepository`
pub struct SqliteCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCursorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CursorRepository for SqliteCursorRepository<'_> {
    fn get(&self, domain: &EntityType) -> Result<Option<SyncCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT cursor, cursor_id, last_synced_at FROM sync_cursors WHERE domain = ?",
                params![domain.as_str()],
                |row| {
                    Ok(SyncCursor {
                        position: PullCursor {
                            updated_at: row.get(0)?,
                            entity_id: row.get(1)?,
                        },
                        last_synced_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    fn set(&self, domain: &EntityType, position: &PullCursor, synced_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_cursors (domain, cursor, cursor_id, last_synced_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET cursor = excluded.cursor,
                cursor_id = excluded.cursor_id, last_synced_at = excluded.last_synced_at",
            params![
                domain.as_str(),
                position.updated_at,
                position.entity_id,
                synced_at
            ],
        )?;
        Ok(())
    }
}
