//! Database layer for the local cache and write journal

mod cache_repository;
mod connection;
mod cursor_repository;
mod migrations;
mod outbox_repository;

pub use cache_repository::{decode_entry, CacheRecord, CacheRepository, SqliteCacheRepository};
pub use connection::Database;
pub use cursor_repository::{CursorRepository, SqliteCursorRepository, SyncCursor};
pub use outbox_repository::{OutboxRepository, SqliteOutboxRepository};
