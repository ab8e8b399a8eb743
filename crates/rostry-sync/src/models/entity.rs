//! Entity type tags, cache rows and the per-type field tables used for
//! conflict detection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain an outbox entry or cache row belongs to.
///
/// Unrecognised labels are preserved in `Other` so rows written by a newer
/// client still round-trip through storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    User,
    Product,
    Order,
    Transfer,
    Chat,
    Post,
    Tracking,
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "USER",
            Self::Product => "PRODUCT",
            Self::Order => "ORDER",
            Self::Transfer => "TRANSFER",
            Self::Chat => "CHAT",
            Self::Post => "POST",
            Self::Tracking => "TRACKING",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Self::User,
            "PRODUCT" => Self::Product,
            "ORDER" => Self::Order,
            "TRANSFER" => Self::Transfer,
            "CHAT" => Self::Chat,
            "POST" => Self::Post,
            "TRACKING" => Self::Tracking,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally cached entity with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Locally modified and not yet acknowledged by the remote
    pub dirty: bool,
    /// Waiting for the user to resolve a conflict
    pub conflicted: bool,
    /// Last write timestamp, local or remote (Unix ms)
    pub updated_at: i64,
}

/// Whether a field takes part in conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Editable on the device; compared against the remote copy
    Mutable,
    /// Maintained by the backend; always taken from the remote copy
    ServerOwned,
}

/// One named field of an entity with its comparator and copier.
pub struct Field<T> {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Returns true when the two values differ
    pub differs: fn(&T, &T) -> bool,
    /// Copies the field from the second argument into the first
    pub take: fn(&mut T, &T),
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// An entity the sync engine can cache, journal, diff and merge.
///
/// The field table lists every field except the bookkeeping ones (`id`,
/// `updated_at`); those are never compared.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn entity_type() -> EntityType;

    fn id(&self) -> &str;

    /// Last modification time (Unix ms)
    fn updated_at(&self) -> i64;

    fn set_updated_at(&mut self, updated_at: i64);

    fn fields() -> &'static [Field<Self>];
}
