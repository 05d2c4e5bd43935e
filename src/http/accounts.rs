//! Account HTTP handlers: user upsert and wallet address linkage.
//!
//! Caller identity is supplied as an opaque user id by the upstream
//! identity provider; these handlers trust it as a precondition.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::{self, AccountError};
use crate::entities::wallet_address;
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(upsert_user))
        .route(
            "/users/{user_id}/addresses",
            get(list_addresses).post(link_address),
        )
        .route("/users/{user_id}/addresses/verify", post(verify_address))
        .route(
            "/users/{user_id}/addresses/{address}",
            axum::routing::delete(unlink_address),
        )
}

impl From<AccountError> for HttpError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidAddress(_) => HttpError::bad_request(err),
            AccountError::AddressTaken(_) => HttpError::new(StatusCode::CONFLICT, err.to_string()),
            AccountError::WalletNotFound | AccountError::UserNotFound(_) => {
                HttpError::not_found(err)
            }
            AccountError::Db(_) => HttpError::internal(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpsertUserRequest {
    user_id: String,
    display_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    user_id: String,
    display_name: Option<String>,
    default_address_id: Option<i64>,
    created_at: DateTime<Utc>,
}

async fn upsert_user(
    State(state): State<AppState>,
    Json(request): Json<UpsertUserRequest>,
) -> Result<Json<UserResponse>, HttpError> {
    if request.user_id.trim().is_empty() || request.user_id.len() > 128 {
        return Err(HttpError::bad_request("user_id must be 1-128 characters"));
    }

    let user = accounts::touch_user(
        &state.database,
        &request.user_id,
        request.display_name.as_deref(),
    )
    .await?;

    Ok(Json(UserResponse {
        user_id: user.id,
        display_name: user.display_name,
        default_address_id: user.default_address_id,
        created_at: user.created_at.with_timezone(&Utc),
    }))
}

#[derive(Debug, Serialize)]
struct WalletResponse {
    address: String,
    status: String,
    verification_method: Option<String>,
    verified_at: Option<DateTime<Utc>>,
}

impl From<wallet_address::Model> for WalletResponse {
    fn from(model: wallet_address::Model) -> Self {
        Self {
            address: model.address,
            status: model.status,
            verification_method: model.verification_method,
            verified_at: model.verified_at.map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

async fn list_addresses(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<WalletResponse>>, HttpError> {
    let wallets = accounts::list_addresses(&state.database, &user_id).await?;
    Ok(Json(wallets.into_iter().map(WalletResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
struct LinkAddressRequest {
    address: String,
    verification_method: Option<String>,
}

async fn link_address(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<LinkAddressRequest>,
) -> Result<Json<WalletResponse>, HttpError> {
    accounts::touch_user(&state.database, &user_id, None).await?;
    let wallet = accounts::link_address(
        &state.database,
        &user_id,
        &request.address,
        request.verification_method.as_deref(),
    )
    .await?;
    Ok(Json(wallet.into()))
}

#[derive(Debug, Deserialize)]
struct VerifyAddressRequest {
    address: String,
    method: String,
}

/// Called by the address-verification collaborator once it has proven
/// control of the address.
async fn verify_address(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<VerifyAddressRequest>,
) -> Result<Json<WalletResponse>, HttpError> {
    if request.method.trim().is_empty() {
        return Err(HttpError::bad_request("method must not be empty"));
    }
    let wallet =
        accounts::mark_verified(&state.database, &user_id, &request.address, &request.method)
            .await?;

    // Verification changes which addresses count toward gates; cached
    // reports are stale the moment it lands.
    state.cache.eligibility.invalidate_all();
    Ok(Json(wallet.into()))
}

async fn unlink_address(
    State(state): State<AppState>,
    Path((user_id, address)): Path<(String, String)>,
) -> Result<StatusCode, HttpError> {
    accounts::unlink_address(&state.database, &user_id, &address).await?;
    state.cache.eligibility.invalidate_all();
    Ok(StatusCode::NO_CONTENT)
}
