//! User profile

use serde::{Deserialize, Serialize};

use super::entity::{EntityType, Field, FieldKind, SyncEntity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// FARMER, ENTHUSIAST or GENERAL
    pub user_type: String,
    /// KYC state, written only by the verification backend
    #[serde(default)]
    pub verification_status: Option<String>,
    pub updated_at: i64,
}

static USER_FIELDS: [Field<User>; 6] = [
    Field {
        name: "displayName",
        kind: FieldKind::Mutable,
        differs: |a, b| a.display_name != b.display_name,
        take: |dst, src| dst.display_name.clone_from(&src.display_name),
    },
    Field {
        name: "email",
        kind: FieldKind::Mutable,
        differs: |a, b| a.email != b.email,
        take: |dst, src| dst.email.clone_from(&src.email),
    },
    Field {
        name: "phone",
        kind: FieldKind::Mutable,
        differs: |a, b| a.phone != b.phone,
        take: |dst, src| dst.phone.clone_from(&src.phone),
    },
    Field {
        name: "location",
        kind: FieldKind::Mutable,
        differs: |a, b| a.location != b.location,
        take: |dst, src| dst.location.clone_from(&src.location),
    },
    Field {
        name: "userType",
        kind: FieldKind::Mutable,
        differs: |a, b| a.user_type != b.user_type,
        take: |dst, src| dst.user_type.clone_from(&src.user_type),
    },
    Field {
        name: "verificationStatus",
        kind: FieldKind::ServerOwned,
        differs: |a, b| a.verification_status != b.verification_status,
        take: |dst, src| dst.verification_status.clone_from(&src.verification_status),
    },
];

impl SyncEntity for User {
    fn entity_type() -> EntityType {
        EntityType::User
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
        &USER_FIELDS
    }
}
