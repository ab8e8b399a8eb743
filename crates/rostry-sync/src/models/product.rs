//! Marketplace product listing

use serde::{Deserialize, Serialize};

use super::entity::{EntityType, Field, FieldKind, SyncEntity};

/// A bird, egg lot or supply listed for sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub breed: Option<String>,
    pub price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Average buyer rating, computed by the backend
    #[serde(default)]
    pub rating: Option<f64>,
    pub updated_at: i64,
}

static PRODUCT_FIELDS: [Field<Product>; 9] = [
    Field {
        name: "sellerId",
        kind: FieldKind::Mutable,
        differs: |a, b| a.seller_id != b.seller_id,
        take: |dst, src| dst.seller_id.clone_from(&src.seller_id),
    },
    Field {
        name: "name",
        kind: FieldKind::Mutable,
        differs: |a, b| a.name != b.name,
        take: |dst, src| dst.name.clone_from(&src.name),
    },
    Field {
        name: "category",
        kind: FieldKind::Mutable,
        differs: |a, b| a.category != b.category,
        take: |dst, src| dst.category.clone_from(&src.category),
    },
    Field {
        name: "breed",
        kind: FieldKind::Mutable,
        differs: |a, b| a.breed != b.breed,
        take: |dst, src| dst.breed.clone_from(&src.breed),
    },
    Field {
        name: "price",
        kind: FieldKind::Mutable,
        differs: |a, b| a.price.to_bits() != b.price.to_bits(),
        take: |dst, src| dst.price = src.price,
    },
    Field {
        name: "quantity",
        kind: FieldKind::Mutable,
        differs: |a, b| a.quantity != b.quantity,
        take: |dst, src| dst.quantity = src.quantity,
    },
    Field {
        name: "location",
        kind: FieldKind::Mutable,
        differs: |a, b| a.location != b.location,
        take: |dst, src| dst.location.clone_from(&src.location),
    },
    Field {
        name: "description",
        kind: FieldKind::Mutable,
        differs: |a, b| a.description != b.description,
        take: |dst, src| dst.description.clone_from(&src.description),
    },
    Field {
        name: "rating",
        kind: FieldKind::ServerOwned,
        differs: |a, b| a.rating.map(f64::to_bits) != b.rating.map(f64::to_bits),
        take: |dst, src| dst.rating = src.rating,
    },
];

impl SyncEntity for Product {
    fn entity_type() -> EntityType {
        EntityType::Product
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
        &PRODUCT_FIELDS
    }
}
