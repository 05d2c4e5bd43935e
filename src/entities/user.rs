//! User entity keyed by the opaque identity key from the auth collaborator.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub display_name: Option<String>,
    /// Free-form social/display metadata
    pub metadata: Option<Json>,
    /// References a verified wallet_addresses row, or null
    pub default_address_id: Option<i64>,
    pub last_seen_at: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wallet_address::Entity")]
    WalletAddress,
}

impl Related<super::wallet_address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletAddress.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
