//! Token-gating HTTP handlers: gate management, eligibility evaluation,
//! and channel membership lifecycle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::accounts;
use crate::balance::BalanceSource;
use crate::eligibility::{self, EligibilityError, MembershipStatus};
use crate::entities::{gate, membership};
use crate::state::{ApiCache, AppState};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/gates", post(create_gate))
        .route("/gates/{channel_id}", get(list_gates))
        .route("/gates/{gate_id}/deactivate", post(deactivate_gate))
        .route("/eligibility/{user_id}/{channel_id}", get(evaluate))
        .route("/memberships", post(join_channel))
        .route("/memberships/{user_id}/{channel_id}", get(membership_status))
        .route("/memberships/{membership_id}/recheck", post(force_recheck))
        .route("/memberships/{membership_id}/override", post(override_status))
}

impl From<EligibilityError> for HttpError {
    fn from(err: EligibilityError) -> Self {
        match err {
            EligibilityError::InvalidThreshold(_)
            | EligibilityError::InvalidToken(_)
            | EligibilityError::InvalidStatus(_) => HttpError::bad_request(err),
            EligibilityError::MembershipNotFound(_) => HttpError::not_found(err),
            EligibilityError::Balance(_) => {
                HttpError::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            EligibilityError::Overflow | EligibilityError::Db(_) => HttpError::internal(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateGateRequest {
    channel_id: String,
    chain_id: u64,
    token_address: String,
    /// Raw threshold in the token's smallest unit, base-10.
    threshold: String,
}

#[derive(Debug, Serialize)]
struct GateResponse {
    id: i64,
    channel_id: String,
    chain_id: u64,
    token_address: String,
    token_symbol: Option<String>,
    token_name: Option<String>,
    token_decimals: Option<i16>,
    threshold: String,
    active: bool,
}

impl From<gate::Model> for GateResponse {
    fn from(model: gate::Model) -> Self {
        Self {
            id: model.id,
            channel_id: model.channel_id,
            chain_id: model.chain_id as u64,
            token_address: model.token_address,
            token_symbol: model.token_symbol,
            token_name: model.token_name,
            token_decimals: model.token_decimals,
            threshold: model.threshold,
            active: model.active,
        }
    }
}

async fn create_gate(
    State(state): State<AppState>,
    Json(request): Json<CreateGateRequest>,
) -> Result<(StatusCode, Json<GateResponse>), HttpError> {
    if request.channel_id.trim().is_empty() {
        return Err(HttpError::bad_request("channel_id must not be empty"));
    }
    if !state.chains.is_supported(request.chain_id) {
        return Err(HttpError::bad_request(format!(
            "chain {} is not supported",
            request.chain_id
        )));
    }
    let token_address = eligibility::normalize_token_address(&request.token_address)?;
    eligibility::parse_threshold(&request.threshold)?;

    // Best-effort metadata snapshot; missing fields stay null and are
    // re-read at evaluation time.
    let token = token_address
        .parse()
        .map_err(|_| HttpError::bad_request("token address is malformed"))?;
    let metadata = state
        .balances
        .read_token_metadata(request.chain_id, token)
        .await;

    let now = Utc::now().fixed_offset();
    let active = gate::ActiveModel {
        channel_id: Set(request.channel_id.clone()),
        chain_id: Set(request.chain_id as i64),
        token_address: Set(token_address),
        token_symbol: Set(Some(metadata.symbol)),
        token_name: Set(Some(metadata.name)),
        token_decimals: Set(Some(metadata.decimals as i16)),
        threshold: Set(request.threshold.trim().to_string()),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let model = active
        .insert(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?;

    state.cache.eligibility.invalidate_all();
    info!(
        gate_id = model.id,
        channel_id = %model.channel_id,
        chain_id = model.chain_id,
        "Created token gate"
    );
    Ok((StatusCode::CREATED, Json(model.into())))
}

async fn list_gates(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<Vec<GateResponse>>, HttpError> {
    let gates = gate::Entity::find()
        .filter(gate::Column::ChannelId.eq(&channel_id))
        .order_by_asc(gate::Column::Id)
        .all(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?;
    Ok(Json(gates.into_iter().map(GateResponse::from).collect()))
}

async fn deactivate_gate(
    State(state): State<AppState>,
    Path(gate_id): Path<i64>,
) -> Result<Json<GateResponse>, HttpError> {
    let model = gate::Entity::find_by_id(gate_id)
        .one(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?
        .ok_or_else(|| HttpError::not_found("gate not found"))?;

    let mut active = model.into_active_model();
    active.active = Set(false);
    active.updated_at = Set(Utc::now().fixed_offset());
    let model = active
        .update(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?;

    state.cache.eligibility.invalidate_all();
    info!(gate_id, "Deactivated token gate");
    Ok(Json(model.into()))
}

async fn evaluate(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(String, String)>,
) -> Result<Json<Value>, HttpError> {
    let key = ApiCache::eligibility_key(&user_id, &channel_id);
    if let Some(cached) = state.cache.eligibility.get(&key).await {
        return Ok(Json(cached));
    }

    let report = eligibility::evaluate_channel_eligibility(
        &state.database,
        state.balances.as_ref(),
        &state.chains,
        &user_id,
        &channel_id,
    )
    .await?;

    let value = serde_json::to_value(&report).map_err(HttpError::internal)?;
    state.cache.eligibility.insert(key, value.clone()).await;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
struct JoinChannelRequest {
    user_id: String,
    channel_id: String,
}

#[derive(Debug, Serialize)]
struct MembershipResponse {
    id: i64,
    user_id: String,
    channel_id: String,
    status: String,
    last_known_balance: String,
    last_checked_at: Option<DateTime<Utc>>,
    next_check_at: DateTime<Utc>,
    warned_at: Option<DateTime<Utc>>,
    kicked_at: Option<DateTime<Utc>>,
}

impl From<membership::Model> for MembershipResponse {
    fn from(model: membership::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            channel_id: model.channel_id,
            status: model.status,
            last_known_balance: model.last_known_balance,
            last_checked_at: model.last_checked_at.map(|ts| ts.with_timezone(&Utc)),
            next_check_at: model.next_check_at.with_timezone(&Utc),
            warned_at: model.warned_at.map(|ts| ts.with_timezone(&Utc)),
            kicked_at: model.kicked_at.map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

async fn join_channel(
    State(state): State<AppState>,
    Json(request): Json<JoinChannelRequest>,
) -> Result<(StatusCode, Json<MembershipResponse>), HttpError> {
    if request.user_id.trim().is_empty() || request.channel_id.trim().is_empty() {
        return Err(HttpError::bad_request(
            "user_id and channel_id must not be empty",
        ));
    }

    if let Some(existing) = membership::Entity::find()
        .filter(membership::Column::UserId.eq(&request.user_id))
        .filter(membership::Column::ChannelId.eq(&request.channel_id))
        .one(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?
    {
        return Ok((StatusCode::OK, Json(existing.into())));
    }

    accounts::touch_user(&state.database, &request.user_id, None).await?;

    let model = eligibility::new_membership(&request.user_id, &request.channel_id)
        .insert(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?;

    info!(
        membership_id = model.id,
        user_id = %model.user_id,
        channel_id = %model.channel_id,
        "Created channel membership"
    );
    Ok((StatusCode::CREATED, Json(model.into())))
}

async fn membership_status(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(String, String)>,
) -> Result<Json<MembershipResponse>, HttpError> {
    let model = membership::Entity::find()
        .filter(membership::Column::UserId.eq(&user_id))
        .filter(membership::Column::ChannelId.eq(&channel_id))
        .one(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?
        .ok_or_else(|| HttpError::not_found("membership not found"))?;
    Ok(Json(model.into()))
}

async fn force_recheck(
    State(state): State<AppState>,
    Path(membership_id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    let model = membership::Entity::find_by_id(membership_id)
        .one(state.database.as_ref())
        .await
        .map_err(HttpError::internal)?
        .ok_or(EligibilityError::MembershipNotFound(membership_id))?;

    let outcome = eligibility::reconcile_membership(
        &state.database,
        state.balances.as_ref(),
        &state.chains,
        model,
    )
    .await?;

    state.cache.eligibility.invalidate_all();
    Ok(Json(
        serde_json::to_value(&outcome).map_err(HttpError::internal)?,
    ))
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    status: String,
}

/// Authorized manual override for moderators; bypasses balance checks.
async fn override_status(
    State(state): State<AppState>,
    Path(membership_id): Path<i64>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<Value>, HttpError> {
    let target = MembershipStatus::parse(&request.status)?;
    let outcome =
        eligibility::override_membership_status(&state.database, membership_id, target).await?;
    state.cache.eligibility.invalidate_all();
    Ok(Json(
        serde_json::to_value(&outcome).map_err(HttpError::internal)?,
    ))
}
