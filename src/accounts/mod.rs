//! Identity and wallet linkage: users keyed by an external identity string,
//! each owning a set of EVM addresses that graduate from `pending` to
//! `verified`. Only verified addresses count toward gate eligibility.

use alloy::primitives::Address;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    ModelTrait, QueryFilter, QueryOrder,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::entities::{user, wallet_address};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_VERIFIED: &str = "verified";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid EVM address '{0}'")]
    InvalidAddress(String),
    #[error("address {0} is already linked to another user")]
    AddressTaken(String),
    #[error("wallet address not found")]
    WalletNotFound,
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

/// Parse and canonicalize to EIP-55 checksum form. All storage and
/// comparison goes through this, so casing differences never create
/// duplicate rows.
pub fn normalize_address(raw: &str) -> Result<String, AccountError> {
    let parsed = raw
        .trim()
        .parse::<Address>()
        .map_err(|_| AccountError::InvalidAddress(raw.to_string()))?;
    Ok(parsed.to_checksum(None))
}

/// Upsert the user row and refresh its last-seen marker. Called on every
/// authenticated request so identities self-register.
pub async fn touch_user(
    db: &DatabaseConnection,
    user_id: &str,
    display_name: Option<&str>,
) -> Result<user::Model, AccountError> {
    assert!(!user_id.is_empty(), "User id must not be empty");
    assert!(user_id.len() <= 128, "User id exceeds column width");

    let now = Utc::now().fixed_offset();
    match user::Entity::find_by_id(user_id).one(db).await? {
        Some(existing) => {
            let mut active = existing.into_active_model();
            active.last_seen_at = Set(now);
            if let Some(name) = display_name {
                active.display_name = Set(Some(name.to_string()));
            }
            Ok(active.update(db).await?)
        }
        None => {
            let active = user::ActiveModel {
                id: Set(user_id.to_string()),
                display_name: Set(display_name.map(str::to_string)),
                metadata: Set(None),
                default_address_id: Set(None),
                last_seen_at: Set(now),
                created_at: Set(now),
            };
            info!(user_id, "Registered new user");
            Ok(active.insert(db).await?)
        }
    }
}

/// Link an address to a user in `pending` state. Linking is idempotent for
/// the same user; an address held by a different user is rejected.
pub async fn link_address(
    db: &DatabaseConnection,
    user_id: &str,
    raw_address: &str,
    verification_method: Option<&str>,
) -> Result<wallet_address::Model, AccountError> {
    let address = normalize_address(raw_address)?;

    if let Some(existing) = wallet_address::Entity::find()
        .filter(wallet_address::Column::Address.eq(&address))
        .one(db)
        .await?
    {
        if existing.user_id == user_id {
            return Ok(existing);
        }
        return Err(AccountError::AddressTaken(address));
    }

    let now = Utc::now().fixed_offset();
    let active = wallet_address::ActiveModel {
        user_id: Set(user_id.to_string()),
        address: Set(address.clone()),
        status: Set(STATUS_PENDING.to_string()),
        verification_method: Set(verification_method.map(str::to_string)),
        verified_at: Set(None),
        registry_metadata: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let model = active.insert(db).await?;
    info!(user_id, address = %model.address, "Linked wallet address");
    Ok(model)
}

/// Promote a linked address to `verified`. Verification never reverts; a
/// second call is a no-op. The wallet becomes the user's default when no
/// default is set yet.
pub async fn mark_verified(
    db: &DatabaseConnection,
    user_id: &str,
    raw_address: &str,
    method: &str,
) -> Result<wallet_address::Model, AccountError> {
    let address = normalize_address(raw_address)?;
    let wallet = wallet_address::Entity::find()
        .filter(wallet_address::Column::UserId.eq(user_id))
        .filter(wallet_address::Column::Address.eq(&address))
        .one(db)
        .await?
        .ok_or(AccountError::WalletNotFound)?;

    if wallet.status == STATUS_VERIFIED {
        return Ok(wallet);
    }

    let now = Utc::now().fixed_offset();
    let wallet_id = wallet.id;
    let mut active = wallet.into_active_model();
    active.status = Set(STATUS_VERIFIED.to_string());
    active.verification_method = Set(Some(method.to_string()));
    active.verified_at = Set(Some(now));
    active.updated_at = Set(now);
    let model = active.update(db).await?;

    let owner = user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| AccountError::UserNotFound(user_id.to_string()))?;
    if owner.default_address_id.is_none() {
        let mut active = owner.into_active_model();
        active.default_address_id = Set(Some(wallet_id));
        active.update(db).await?;
    }

    info!(user_id, address = %model.address, method, "Verified wallet address");
    Ok(model)
}

/// Default-address outcome after one wallet is removed. `None` leaves the
/// user row untouched; `Some(new_default)` writes the replacement, which
/// is itself `None` when no verified wallet remains.
fn reassigned_default(
    removed_wallet_id: i64,
    current_default: Option<i64>,
    replacement: Option<i64>,
) -> Option<Option<i64>> {
    (current_default == Some(removed_wallet_id)).then_some(replacement)
}

/// Remove a linked address. When the removed wallet was the user's
/// default, the default moves to another verified wallet if one exists.
pub async fn unlink_address(
    db: &DatabaseConnection,
    user_id: &str,
    raw_address: &str,
) -> Result<(), AccountError> {
    let address = normalize_address(raw_address)?;
    let wallet = wallet_address::Entity::find()
        .filter(wallet_address::Column::UserId.eq(user_id))
        .filter(wallet_address::Column::Address.eq(&address))
        .one(db)
        .await?
        .ok_or(AccountError::WalletNotFound)?;

    let wallet_id = wallet.id;
    wallet.delete(db).await?;

    let owner = user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| AccountError::UserNotFound(user_id.to_string()))?;
    let replacement = if owner.default_address_id == Some(wallet_id) {
        wallet_address::Entity::find()
            .filter(wallet_address::Column::UserId.eq(user_id))
            .filter(wallet_address::Column::Status.eq(STATUS_VERIFIED))
            .order_by_asc(wallet_address::Column::Id)
            .one(db)
            .await?
            .map(|w| w.id)
    } else {
        None
    };
    if let Some(new_default) = reassigned_default(wallet_id, owner.default_address_id, replacement) {
        let mut active = owner.into_active_model();
        active.default_address_id = Set(new_default);
        active.update(db).await?;
    }

    info!(user_id, %address, "Unlinked wallet address");
    Ok(())
}

pub async fn list_addresses(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<wallet_address::Model>, AccountError> {
    let wallets = wallet_address::Entity::find()
        .filter(wallet_address::Column::UserId.eq(user_id))
        .order_by_asc(wallet_address::Column::Id)
        .all(db)
        .await?;
    Ok(wallets)
}

/// The user's verified addresses as parsed EVM addresses. A stored row
/// that no longer parses is skipped with a warning rather than failing
/// the whole evaluation.
pub async fn verified_addresses(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<Address>, DbErr> {
    let rows = wallet_address::Entity::find()
        .filter(wallet_address::Column::UserId.eq(user_id))
        .filter(wallet_address::Column::Status.eq(STATUS_VERIFIED))
        .order_by_asc(wallet_address::Column::Id)
        .all(db)
        .await?;

    let mut addresses = Vec::with_capacity(rows.len());
    for row in rows {
        match row.address.parse::<Address>() {
            Ok(address) => addresses.push(address),
            Err(_) => warn!(user_id, address = %row.address, "Skipping unparsable stored address"),
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    const ADDR: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    fn wallet_model(id: i64, user_id: &str, address: &str, status: &str) -> wallet_address::Model {
        let now = Utc::now().fixed_offset();
        wallet_address::Model {
            id,
            user_id: user_id.to_string(),
            address: address.to_string(),
            status: status.to_string(),
            verification_method: None,
            verified_at: None,
            registry_metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn user_model(id: &str, default_address_id: Option<i64>) -> user::Model {
        let now = Utc::now().fixed_offset();
        user::Model {
            id: id.to_string(),
            display_name: None,
            metadata: None,
            default_address_id,
            last_seen_at: now,
            created_at: now,
        }
    }

    #[test]
    fn normalize_produces_checksum_casing() {
        let normalized =
            normalize_address("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359").expect("valid");
        assert_eq!(normalized, "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");

        // Already-checksummed and shouty-cased inputs normalize identically.
        let upper =
            normalize_address("0xFB6916095CA1DF60BB79CE92CE3EA74C37C5D359").expect("valid");
        assert_eq!(upper, normalized);
    }

    #[test]
    fn normalize_rejects_malformed_input() {
        assert!(normalize_address("").is_err());
        assert!(normalize_address("0x123").is_err());
        assert!(normalize_address("not-an-address").is_err());
        assert!(normalize_address("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d35z").is_err());
    }

    #[test]
    fn removed_default_reassigns_to_remaining_verified_wallet() {
        assert_eq!(reassigned_default(1, Some(1), Some(2)), Some(Some(2)));
    }

    #[test]
    fn removed_default_clears_when_no_verified_wallet_remains() {
        assert_eq!(reassigned_default(1, Some(1), None), Some(None));
    }

    #[test]
    fn non_default_removal_leaves_default_untouched() {
        assert_eq!(reassigned_default(2, Some(1), Some(3)), None);
        assert_eq!(reassigned_default(2, None, None), None);
    }

    #[tokio::test]
    async fn link_rejects_address_held_by_another_user() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![wallet_model(1, "user-a", ADDR, STATUS_VERIFIED)]])
            .into_connection();

        let err = link_address(&db, "user-b", ADDR, None).await.unwrap_err();
        assert!(matches!(err, AccountError::AddressTaken(_)));
    }

    #[tokio::test]
    async fn link_is_idempotent_for_the_same_user() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![wallet_model(7, "user-a", ADDR, STATUS_PENDING)]])
            .into_connection();

        let model = link_address(&db, "user-a", ADDR, None).await.unwrap();
        assert_eq!(model.id, 7);
        // Only the lookup ran: the existing row is returned, not re-inserted.
        assert_eq!(db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn unlinking_the_default_wallet_promotes_the_next_verified_one() {
        let other = "0x52908400098527886E0F7030069857D2E4169EE7";
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![wallet_model(1, "user-a", ADDR, STATUS_VERIFIED)]])
            .append_query_results([vec![user_model("user-a", Some(1))]])
            .append_query_results([vec![wallet_model(2, "user-a", other, STATUS_VERIFIED)]])
            .append_query_results([vec![user_model("user-a", Some(2))]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        unlink_address(&db, "user-a", ADDR).await.unwrap();
        // Lookup, delete, owner load, replacement load, default rewrite.
        assert_eq!(db.into_transaction_log().len(), 5);
    }

    #[tokio::test]
    async fn unlinking_a_non_default_wallet_leaves_the_default_alone() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![wallet_model(3, "user-a", ADDR, STATUS_PENDING)]])
            .append_query_results([vec![user_model("user-a", Some(1))]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        unlink_address(&db, "user-a", ADDR).await.unwrap();
        // Lookup, delete, owner load; no user-row write.
        assert_eq!(db.into_transaction_log().len(), 3);
    }
}
