use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_addresses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    /// EIP-55 checksum form, globally unique
    #[sea_orm(column_type = "String(StringLen::N(42))")]
    pub address: String,
    /// "pending" or "verified"
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub status: String,
    /// "signature" or "registry", unset while pending
    pub verification_method: Option<String>,
    pub verified_at: Option<DateTimeWithTimeZone>,
    /// Name/avatar/social handles from the external registry
    pub registry_metadata: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
