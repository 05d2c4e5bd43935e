//! Faucet claim entity for sponsor-paid (gasless) claim transactions.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "faucet_claims")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    /// Checksummed recipient address
    #[sea_orm(column_type = "String(StringLen::N(42))")]
    pub recipient_address: String,
    pub chain_id: i64,
    /// "pending", "submitting", "submitted", "confirmed" or "failed"
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub status: String,
    /// Set on transition to submitted, the reconciler's recovery anchor
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
