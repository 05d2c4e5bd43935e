//! Faucet claim HTTP handlers: intake plus the status poll used by
//! callers while the claim works through the pipeline.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::{ClaimRecord, IntakeError};
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(request_claim))
        .route("/{claim_id}", get(claim_status))
}

impl From<IntakeError> for HttpError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidAddress(_) | IntakeError::UnsupportedChain(_) => {
                HttpError::bad_request(err)
            }
            IntakeError::AlreadyClaimed | IntakeError::ClaimInProgress => {
                HttpError::new(StatusCode::CONFLICT, err.to_string())
            }
            IntakeError::Store(_) => HttpError::internal(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    user_id: String,
    recipient_address: String,
    chain_id: u64,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    claim_id: i64,
    user_id: String,
    recipient_address: String,
    chain_id: u64,
    status: String,
    tx_hash: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClaimRecord> for ClaimResponse {
    fn from(record: ClaimRecord) -> Self {
        Self {
            claim_id: record.id,
            user_id: record.user_id,
            recipient_address: record.recipient_address,
            chain_id: record.chain_id,
            status: record.status.as_str().to_string(),
            tx_hash: record.tx_hash,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Accepts the claim and returns immediately; submission happens on the
/// chain's worker and is observed via the status poll.
async fn request_claim(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<ClaimResponse>), HttpError> {
    if request.user_id.trim().is_empty() || request.user_id.len() > 128 {
        return Err(HttpError::bad_request("user_id must be 1-128 characters"));
    }

    let record = state
        .claims
        .request_claim(&request.user_id, &request.recipient_address, request.chain_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(record.into())))
}

async fn claim_status(
    State(state): State<AppState>,
    Path(claim_id): Path<i64>,
) -> Result<Json<ClaimResponse>, HttpError> {
    let record = state
        .claims
        .claim_status(claim_id)
        .await
        .map_err(HttpError::internal)?
        .ok_or_else(|| HttpError::not_found("claim not found"))?;
    Ok(Json(record.into()))
}
