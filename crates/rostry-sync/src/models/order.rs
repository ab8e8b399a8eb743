//! Marketplace order

use serde::{Deserialize, Serialize};

use super::entity::{EntityType, Field, FieldKind, SyncEntity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub amount: f64,
    /// PLACED, CONFIRMED, DISPATCHED, DELIVERED, CANCELLED
    pub status: String,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Set by payment verification on the backend
    #[serde(default)]
    pub payment_status: Option<String>,
    pub updated_at: i64,
}

static ORDER_FIELDS: [Field<Order>; 9] = [
    Field {
        name: "buyerId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.buyer_id != b.buyer_id,
        take: |dst, src| dst.buyer_id.clone_from(&src.buyer_id),
    },
    Field {
        name: "sellerId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.seller_id != b.seller_id,
        take: |dst, src| dst.seller_id.clone_from(&src.seller_id),
    },
    Field {
        name: "productId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.product_id != b.product_id,
        take: |dst, src| dst.product_id.clone_from(&src.product_id),
    },
    Field {
        name: "quantity",
        kind: FieldKind::Mutable,
        differs: |a, b| a.quantity != b.quantity,
        take: |dst, src| dst.quantity = src.quantity,
    },
    Field {
        name: "amount",
        kind: FieldKind::Mutable,
        differs: |a, b| a.amount.to_bits() != b.amount.to_bits(),
        take: |dst, src| dst.amount = src.amount,
    },
    Field {
        name: "status",
        kind: FieldKind::Mutable,
        differs: |a, b| a.status != b.status,
        take: |dst, src| dst.status.clone_from(&src.status),
    },
    Field {
        name: "deliveryAddress",
        kind: FieldKind::Mutable,
        differs: |a, b| a.delivery_address != b.delivery_address,
        take: |dst, src| dst.delivery_address.clone_from(&src.delivery_address),
    },
    Field {
        name: "notes",
        kind: FieldKind::Mutable,
        differs: |a, b| a.notes != b.notes,
        take: |dst, src| dst.notes.clone_from(&src.notes),
    },
    Field {
        name: "paymentStatus",
        kind: FieldKind::ServerOwned,
        differs: |a, b| a.payment_status != b.payment_status,
        take: |dst, src| dst.payment_status.clone_from(&src.payment_status),
    },
];

impl SyncEntity for Order {
    fn entity_type() -> EntityType {
        EntityType::Order
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
        &ORDER_FIELDS
    }
}
