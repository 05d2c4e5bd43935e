//! Sponsor-paid faucet claims: synchronous intake with duplicate guards,
//! asynchronous per-chain submission, and a stale-claim reconciler that
//! resolves ambiguous outcomes against on-chain truth.

pub mod processor;
pub mod reconciler;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::accounts;
use crate::claims::processor::FaucetChain;

/// Depth of each per-chain submission queue.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Submitting,
    Submitted,
    Confirmed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "submitting" => Some(Self::Submitting),
            "submitted" => Some(Self::Submitted),
            "confirmed" => Some(Self::Confirmed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A live claim for the same address or user already exists; raced
    /// intakes land here via the partial unique indexes.
    #[error("conflicting live claim")]
    Conflict,
    #[error("claim store backend error: {0}")]
    Backend(String),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        let message = err.to_string();
        // Postgres surfaces partial-unique-index violations as 23505.
        if message.contains("duplicate key") || message.contains("23505") {
            StoreError::Conflict
        } else {
            StoreError::Backend(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid recipient address '{0}'")]
    InvalidAddress(String),
    #[error("chain {0} is not supported")]
    UnsupportedChain(u64),
    #[error("address or user has already claimed")]
    AlreadyClaimed,
    #[error("a claim is already in progress")]
    ClaimInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store-agnostic view of one claim row.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimRecord {
    pub id: i64,
    pub user_id: String,
    pub recipient_address: String,
    pub chain_id: u64,
    pub status: ClaimStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence seam for claims. The production implementation is
/// [`store::SeaOrmClaimStore`]; tests use an in-memory one.
#[async_trait::async_trait]
pub trait ClaimStore: Send + Sync {
    async fn insert_claim(
        &self,
        user_id: &str,
        recipient: &str,
        chain_id: u64,
    ) -> Result<ClaimRecord, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ClaimRecord>, StoreError>;

    /// The at-most-one live (non-`failed`) claim for an address.
    async fn find_live_for_address(
        &self,
        recipient: &str,
    ) -> Result<Option<ClaimRecord>, StoreError>;

    /// The at-most-one live (non-`failed`) claim for a user.
    async fn find_live_for_user(&self, user_id: &str) -> Result<Option<ClaimRecord>, StoreError>;

    /// Guarded status transition: applies only when the current status is
    /// one of `from`, returning `None` when the guard does not hold. The
    /// single mutation path, so transitions stay monotonic.
    async fn transition(
        &self,
        id: i64,
        from: &[ClaimStatus],
        to: ClaimStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) -> Result<Option<ClaimRecord>, StoreError>;

    /// Non-terminal claims untouched since `cutoff`, oldest first.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<ClaimRecord>, StoreError>;
}

fn dedupe_error(existing: &ClaimRecord) -> IntakeError {
    if existing.status == ClaimStatus::Confirmed {
        IntakeError::AlreadyClaimed
    } else {
        IntakeError::ClaimInProgress
    }
}

/// Intake plus the per-chain submission queues.
///
/// Each supported chain gets exactly one worker task, so sponsor-paid
/// transactions on a chain are submitted one at a time and the sponsor
/// nonce is never raced.
pub struct ClaimService {
    store: Arc<dyn ClaimStore>,
    chain: Arc<dyn FaucetChain>,
    queues: HashMap<u64, mpsc::Sender<i64>>,
}

impl ClaimService {
    /// Spawn one submission worker per supported chain and return the
    /// service handle.
    pub fn start(
        store: Arc<dyn ClaimStore>,
        chain: Arc<dyn FaucetChain>,
        chain_ids: &[u64],
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        assert!(!chain_ids.is_empty(), "Claim service needs at least one chain");

        let mut queues = HashMap::with_capacity(chain_ids.len());
        for &chain_id in chain_ids {
            let (tx, rx) = mpsc::channel::<i64>(QUEUE_DEPTH);
            let worker_store = Arc::clone(&store);
            let worker_chain = Arc::clone(&chain);
            let worker_shutdown = shutdown.clone();
            tokio::spawn(async move {
                submission_worker(chain_id, worker_store, worker_chain, worker_shutdown, rx).await;
            });
            queues.insert(chain_id, tx);
        }

        Self {
            store,
            chain,
            queues,
        }
    }

    /// Validate, record, and schedule a claim. Returns as soon as the row
    /// is persisted; submission happens on the chain's worker.
    ///
    /// Validation order: address syntax, chain support, per-address
    /// dedupe, per-user dedupe.
    pub async fn request_claim(
        &self,
        user_id: &str,
        raw_address: &str,
        chain_id: u64,
    ) -> Result<ClaimRecord, IntakeError> {
        let recipient = accounts::normalize_address(raw_address)
            .map_err(|_| IntakeError::InvalidAddress(raw_address.to_string()))?;

        if !self.chain.supports(chain_id) {
            return Err(IntakeError::UnsupportedChain(chain_id));
        }

        if let Some(existing) = self.store.find_live_for_address(&recipient).await? {
            return Err(dedupe_error(&existing));
        }
        if let Some(existing) = self.store.find_live_for_user(user_id).await? {
            return Err(dedupe_error(&existing));
        }

        let claim = match self.store.insert_claim(user_id, &recipient, chain_id).await {
            Ok(claim) => claim,
            // Lost a race against an identical intake between the dedupe
            // reads and the insert.
            Err(StoreError::Conflict) => return Err(IntakeError::ClaimInProgress),
            Err(err) => return Err(err.into()),
        };

        info!(
            claim_id = claim.id,
            user_id,
            recipient = %claim.recipient_address,
            chain_id,
            "Accepted faucet claim"
        );

        // Fire-and-forget: a dropped enqueue leaves the row pending and
        // the stale sweep resolves it.
        if let Some(queue) = self.queues.get(&chain_id) {
            if let Err(err) = queue.try_send(claim.id) {
                warn!(claim_id = claim.id, chain_id, "Claim queue full, deferring to sweep: {err}");
            }
        } else {
            warn!(claim_id = claim.id, chain_id, "No submission queue for chain");
        }

        Ok(claim)
    }

    pub async fn claim_status(&self, claim_id: i64) -> Result<Option<ClaimRecord>, StoreError> {
        self.store.find_by_id(claim_id).await
    }

    pub fn store(&self) -> Arc<dyn ClaimStore> {
        Arc::clone(&self.store)
    }
}

async fn submission_worker(
    chain_id: u64,
    store: Arc<dyn ClaimStore>,
    chain: Arc<dyn FaucetChain>,
    mut shutdown: watch::Receiver<bool>,
    mut queue: mpsc::Receiver<i64>,
) {
    info!(chain_id, "Starting claim submission worker");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(_) => {
                        if *shutdown.borrow() {
                            info!(chain_id, "Claim worker shutdown signal received");
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(chain_id, "Shutdown channel closed unexpectedly. Exiting claim worker");
                        break;
                    }
                }
            }
            next = queue.recv() => {
                let Some(claim_id) = next else {
                    info!(chain_id, "Claim queue closed. Exiting claim worker");
                    break;
                };
                if let Err(err) =
                    processor::process_claim(store.as_ref(), chain.as_ref(), claim_id).await
                {
                    warn!(claim_id, chain_id, "Claim processing error: {err}");
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::processor::{ChainCallError, FaucetChain, ReceiptOutcome, SubmitError};
    use super::testing::MemoryClaimStore;
    use super::*;
    use alloy::primitives::Address;

    struct StubChain;

    #[async_trait::async_trait]
    impl FaucetChain for StubChain {
        fn supports(&self, chain_id: u64) -> bool {
            chain_id == 8453
        }

        async fn already_claimed(
            &self,
            _chain_id: u64,
            _recipient: Address,
        ) -> Result<bool, ChainCallError> {
            Ok(false)
        }

        async fn submit_claim(
            &self,
            _chain_id: u64,
            _recipient: Address,
        ) -> Result<String, SubmitError> {
            Ok("0xdead".to_string())
        }

        async fn await_receipt(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<ReceiptOutcome, ChainCallError> {
            Ok(ReceiptOutcome::Success)
        }

        async fn receipt_status(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<Option<ReceiptOutcome>, ChainCallError> {
            Ok(Some(ReceiptOutcome::Success))
        }
    }

    fn service() -> (ClaimService, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let service = ClaimService::start(
            Arc::new(MemoryClaimStore::new()),
            Arc::new(StubChain),
            &[8453],
            rx,
        );
        (service, tx)
    }

    const ADDR_A: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";
    const ADDR_B: &str = "0x1111111111111111111111111111111111111111";

    #[tokio::test]
    async fn intake_rejects_malformed_address_before_anything_else() {
        let (service, _shutdown) = service();
        let err = service
            .request_claim("user-1", "nonsense", 8453)
            .await
            .expect_err("must reject");
        assert!(matches!(err, IntakeError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn intake_rejects_unsupported_chain() {
        let (service, _shutdown) = service();
        let err = service
            .request_claim("user-1", ADDR_A, 999)
            .await
            .expect_err("must reject");
        assert!(matches!(err, IntakeError::UnsupportedChain(999)));
    }

    #[tokio::test]
    async fn duplicate_address_maps_to_in_progress_then_already_claimed() {
        let (service, _shutdown) = service();
        let claim = service
            .request_claim("user-1", ADDR_A, 8453)
            .await
            .expect("first claim");
        assert_eq!(claim.status, ClaimStatus::Pending);

        // Live claim for the same address, different user.
        let err = service
            .request_claim("user-2", ADDR_A, 8453)
            .await
            .expect_err("duplicate address");
        assert!(matches!(err, IntakeError::ClaimInProgress));

        // Once confirmed, the duplicate becomes AlreadyClaimed.
        service
            .store()
            .transition(
                claim.id,
                &[ClaimStatus::Pending],
                ClaimStatus::Confirmed,
                None,
                None,
            )
            .await
            .expect("transition")
            .expect("guard holds");
        let err = service
            .request_claim("user-2", ADDR_A, 8453)
            .await
            .expect_err("already claimed");
        assert!(matches!(err, IntakeError::AlreadyClaimed));
    }

    #[tokio::test]
    async fn duplicate_user_is_rejected_even_with_fresh_address() {
        let (service, _shutdown) = service();
        service
            .request_claim("user-1", ADDR_A, 8453)
            .await
            .expect("first claim");
        let err = service
            .request_claim("user-1", ADDR_B, 8453)
            .await
            .expect_err("duplicate user");
        assert!(matches!(err, IntakeError::ClaimInProgress));
    }

    #[tokio::test]
    async fn failed_claim_frees_address_and_user_for_retry() {
        let (service, _shutdown) = service();
        let claim = service
            .request_claim("user-1", ADDR_A, 8453)
            .await
            .expect("first claim");
        service
            .store()
            .transition(
                claim.id,
                &[ClaimStatus::Pending],
                ClaimStatus::Failed,
                None,
                Some("boom".to_string()),
            )
            .await
            .expect("transition")
            .expect("guard holds");

        let retry = service
            .request_claim("user-1", ADDR_A, 8453)
            .await
            .expect("retry after failure");
        assert_eq!(retry.status, ClaimStatus::Pending);
        assert_ne!(retry.id, claim.id);
    }

    #[tokio::test]
    async fn insert_race_surfaces_as_claim_in_progress() {
        let store = MemoryClaimStore::new();
        store
            .insert_claim("user-1", ADDR_A, 8453)
            .await
            .expect("seed");
        let err = store
            .insert_claim("user-2", ADDR_A, 8453)
            .await
            .expect_err("conflict");
        assert!(matches!(err, StoreError::Conflict));
    }
}
