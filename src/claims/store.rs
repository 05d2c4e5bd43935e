//! Postgres-backed [`ClaimStore`]. Dedupe is enforced by partial unique
//! indexes over non-`failed` rows, and status transitions are guarded
//! compare-and-set updates so no writer can move a claim backward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

use crate::claims::{ClaimRecord, ClaimStatus, ClaimStore, StoreError};
use crate::entities::faucet_claim;

const LIVE_STATUSES: [&str; 4] = ["pending", "submitting", "submitted", "confirmed"];
const NON_TERMINAL_STATUSES: [&str; 3] = ["pending", "submitting", "submitted"];

pub struct SeaOrmClaimStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmClaimStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_record(model: faucet_claim::Model) -> Result<ClaimRecord, StoreError> {
    let status = ClaimStatus::parse(&model.status)
        .ok_or_else(|| StoreError::Backend(format!("invalid stored status '{}'", model.status)))?;
    Ok(ClaimRecord {
        id: model.id,
        user_id: model.user_id,
        recipient_address: model.recipient_address,
        chain_id: model.chain_id as u64,
        status,
        tx_hash: model.tx_hash,
        error: model.error,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

#[async_trait::async_trait]
impl ClaimStore for SeaOrmClaimStore {
    async fn insert_claim(
        &self,
        user_id: &str,
        recipient: &str,
        chain_id: u64,
    ) -> Result<ClaimRecord, StoreError> {
        let now = Utc::now().fixed_offset();
        let active = faucet_claim::ActiveModel {
            user_id: Set(user_id.to_string()),
            recipient_address: Set(recipient.to_string()),
            chain_id: Set(chain_id as i64),
            status: Set(ClaimStatus::Pending.as_str().to_string()),
            tx_hash: Set(None),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = active.insert(self.db.as_ref()).await?;
        to_record(model)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ClaimRecord>, StoreError> {
        let model = faucet_claim::Entity::find_by_id(id).one(self.db.as_ref()).await?;
        model.map(to_record).transpose()
    }

    async fn find_live_for_address(
        &self,
        recipient: &str,
    ) -> Result<Option<ClaimRecord>, StoreError> {
        let model = faucet_claim::Entity::find()
            .filter(faucet_claim::Column::RecipientAddress.eq(recipient))
            .filter(faucet_claim::Column::Status.is_in(LIVE_STATUSES))
            .one(self.db.as_ref())
            .await?;
        model.map(to_record).transpose()
    }

    async fn find_live_for_user(&self, user_id: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let model = faucet_claim::Entity::find()
            .filter(faucet_claim::Column::UserId.eq(user_id))
            .filter(faucet_claim::Column::Status.is_in(LIVE_STATUSES))
            .one(self.db.as_ref())
            .await?;
        model.map(to_record).transpose()
    }

    async fn transition(
        &self,
        id: i64,
        from: &[ClaimStatus],
        to: ClaimStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) -> Result<Option<ClaimRecord>, StoreError> {
        let from_statuses: Vec<&str> = from.iter().map(|status| status.as_str()).collect();
        let mut update = faucet_claim::Entity::update_many()
            .filter(faucet_claim::Column::Id.eq(id))
            .filter(faucet_claim::Column::Status.is_in(from_statuses))
            .col_expr(faucet_claim::Column::Status, Expr::value(to.as_str()))
            .col_expr(
                faucet_claim::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            );
        if let Some(tx_hash) = tx_hash {
            update = update.col_expr(faucet_claim::Column::TxHash, Expr::value(tx_hash));
        }
        if let Some(error) = error {
            update = update.col_expr(faucet_claim::Column::Error, Expr::value(error));
        }

        let result = update.exec(self.db.as_ref()).await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        assert!(result.rows_affected == 1, "Claim id must be unique");
        self.find_by_id(id).await
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<ClaimRecord>, StoreError> {
        let models = faucet_claim::Entity::find()
            .filter(faucet_claim::Column::Status.is_in(NON_TERMINAL_STATUSES))
            .filter(faucet_claim::Column::UpdatedAt.lt(cutoff.fixed_offset()))
            .order_by_asc(faucet_claim::Column::UpdatedAt)
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(to_record).collect()
    }
}
