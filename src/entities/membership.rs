//! Membership entity: the per-user, per-channel gating record.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memberships")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub channel_id: String,
    /// "pending", "eligible", "warned" or "kicked"
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub status: String,
    /// Raw integer string, last aggregate seen by the engine
    #[sea_orm(column_type = "String(StringLen::N(96))")]
    pub last_known_balance: String,
    pub last_checked_at: Option<DateTimeWithTimeZone>,
    /// Seeded to the epoch at creation so the first sweep finds the row
    pub next_check_at: DateTimeWithTimeZone,
    pub warned_at: Option<DateTimeWithTimeZone>,
    pub kicked_at: Option<DateTimeWithTimeZone>,
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
