//! Data models for the sync engine

mod chat;
mod cursor;
mod entity;
mod order;
mod outbox;
mod product;
mod sync_conflict;
mod transfer;
mod user;

pub use chat::ChatMessage;
pub use cursor::PullCursor;
pub use entity::{CacheEntry, EntityType, Field, FieldKind, SyncEntity};
pub use order::Order;
pub use outbox::{
    NewOutboxEntry, OutboxEntry, OutboxEntryId, OutboxOperation, OutboxPriority, OutboxStatus,
    SyncIssue,
};
pub use product::Product;
pub use sync_conflict::{Resolution, SyncConflict};
pub use transfer::Transfer;
pub use user::User;
