//! Gate entity: a (chain, token, threshold) rule attached to a channel.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub channel_id: String,
    pub chain_id: i64,
    /// Lower-cased token contract address
    #[sea_orm(column_type = "String(StringLen::N(42))")]
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub token_name: Option<String>,
    pub token_decimals: Option<i16>,
    /// Non-negative base-10 integer string, smallest-unit precision
    #[sea_orm(column_type = "String(StringLen::N(96))")]
    pub threshold: String,
    pub active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
