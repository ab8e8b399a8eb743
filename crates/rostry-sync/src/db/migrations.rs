//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: write journal and entity cache
fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS outbox (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_status_created ON outbox(status, created_at, seq);
        CREATE INDEX IF NOT EXISTS idx_outbox_user ON outbox(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_outbox_entity ON outbox(entity_type, entity_id);

        CREATE TABLE IF NOT EXISTS entity_cache (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            dirty INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_entity_cache_dirty ON entity_cache(entity_type, dirty);
        CREATE INDEX IF NOT EXISTS idx_entity_cache_updated ON entity_cache(entity_type, updated_at);

        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;
    Ok(())
}

/// Migration to version 2: pull cursors, drain priority, failure details
/// for the sync issues list, and the conflict marker on cache rows
fn migrate_v2(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_cursors (
            domain TEXT PRIMARY KEY,
            cursor INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER
        );

        ALTER TABLE outbox ADD COLUMN priority INTEGER NOT NULL DEFAULT 1;
        ALTER TABLE outbox ADD COLUMN last_error TEXT;
        ALTER TABLE outbox ADD COLUMN error_kind TEXT;
        CREATE INDEX IF NOT EXISTS idx_outbox_priority ON outbox(status, priority DESC, created_at, seq);

        ALTER TABLE entity_cache ADD COLUMN conflicted INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;
    Ok(())
}

/// Migration to version 3: tie-breaking id on pull cursors
fn migrate_v3(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE sync_cursors ADD COLUMN cursor_id TEXT;

        INSERT INTO schema_version (version) VALUES (3);",
    )?;

    tx.commit()?;
    Ok(())
}
