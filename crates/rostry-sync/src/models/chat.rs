//! Direct message between buyer and seller

use serde::{Deserialize, Serialize};

use super::entity::{EntityType, Field, FieldKind, SyncEntity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub delivered_at: Option<i64>,
    pub updated_at: i64,
}

static CHAT_FIELDS: [Field<ChatMessage>; 6] = [
    Field {
        name: "threadId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.thread_id != b.thread_id,
        take: |dst, src| dst.thread_id.clone_from(&src.thread_id),
    },
    Field {
        name: "senderId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.sender_id != b.sender_id,
        take: |dst, src| dst.sender_id.clone_from(&src.sender_id),
    },
    Field {
        name: "receiverId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.receiver_id != b.receiver_id,
        take: |dst, src| dst.receiver_id.clone_from(&src.receiver_id),
    },
    Field {
        name: "body",
        kind: FieldKind::Mutable,
        differs: |a, b| a.body != b.body,
        take: |dst, src| dst.body.clone_from(&src.body),
    },
    Field {
        name: "read",
        kind: FieldKind::Mutable,
        differs: |a, b| a.read != b.read,
        take: |dst, src| dst.read = src.read,
    },
    Field {
        name: "deliveredAt",
        kind: FieldKind::ServerOwned,
        differs: |a, b| a.delivered_at != b.delivered_at,
        take: |dst, src| dst.delivered_at = src.delivered_at,
    },
];

impl SyncEntity for ChatMessage {
    fn entity_type() -> EntityType {
        EntityType::Chat
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn set_updated_at(&mut self, updated_at: i64) {
        self.updated_at = updated_at;
    }

    fn fields() -> &'static [Field<Self>] {
        &CHAT_FIELDS
    }
}
