//! Ownership transfer of a bird or flock between users

use serde::{Deserialize, Serialize};

use super::entity::{EntityType, Field, FieldKind, SyncEntity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub product_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default)]
    pub amount: Option<f64>,
    /// PENDING, VERIFIED, COMPLETED or REJECTED
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub verified_at: Option<i64>,
    pub updated_at: i64,
}

static TRANSFER_FIELDS: [Field<Transfer>; 7] = [
    Field {
        name: "productId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.product_id != b.product_id,
        take: |dst, src| dst.product_id.clone_from(&src.product_id),
    },
    Field {
        name: "fromUserId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.from_user_id != b.from_user_id,
        take: |dst, src| dst.from_user_id.clone_from(&src.from_user_id),
    },
    Field {
        name: "toUserId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.to_user_id != b.to_user_id,
        take: |dst, src| dst.to_user_id.clone_from(&src.to_user_id),
    },
    Field {
        name: "amount",
        kind: FieldKind::Mutable,
        differs: |a, b| a.amount.map(f64::to_bits) != b.amount.map(f64::to_bits),
        take: |dst, src| dst.amount = src.amount,
    },
    Field {
        name: "status",
        kind: FieldKind::Mutable,
        differs: |a, b| a.status != b.status,
        take: |dst, src| dst.status.clone_from(&src.status),
    },
    Field {
        name: "notes",
        kind: FieldKind::Mutable,
        differs: |a, b| a.notes != b.notes,
        take: |dst, src| dst.notes.clone_from(&src.notes),
    },
    Field {
        name: "verifiedAt",
        kind: FieldKind::ServerOwned,
        differs: |a, b| a.verified_at != b.verified_at,
        take: |dst, src| dst.verified_at = src.verified_at,
    },
];

impl SyncEntity for Transfer {
    fn entity_type() -> EntityType {
        EntityType::Transfer
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
        &TRANSFER_FIELDS
    }
}
