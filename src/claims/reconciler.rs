//! Stale-Claim Reconciler: the only writer allowed to resolve a claim the
//! processor left behind. Local state must never permanently disagree with
//! the chain for a confirmed transaction, so a stale `submitted` claim is
//! checked against its receipt before the terminal fallback to `failed`.

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::claims::processor::{FaucetChain, ReceiptOutcome};
use crate::claims::{ClaimStatus, ClaimStore, StoreError};

pub const SWEEP_INTERVAL_SECONDS: u64 = 120;
/// A non-terminal claim untouched this long is considered abandoned.
pub const STALENESS_SECONDS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleResolution {
    Confirm,
    Fail(String),
}

/// Decide a stale claim's terminal state from what the sweep could learn.
/// `receipt` is the on-chain answer where one was obtainable; a missing
/// hash, an absent receipt, and a failed receipt read all arrive as
/// `None` and fall through to the terminal failure.
pub fn resolve_stale_claim(
    status: ClaimStatus,
    tx_hash: Option<&str>,
    receipt: Option<ReceiptOutcome>,
) -> StaleResolution {
    if status == ClaimStatus::Submitted && tx_hash.is_some() {
        return match receipt {
            Some(ReceiptOutcome::Success) => StaleResolution::Confirm,
            Some(ReceiptOutcome::Reverted) => {
                StaleResolution::Fail("transaction reverted on-chain".to_string())
            }
            None => StaleResolution::Fail(
                "claim timed out without a confirmed transaction".to_string(),
            ),
        };
    }
    StaleResolution::Fail("claim processing timed out before submission".to_string())
}

#[derive(Debug, Default, Serialize)]
pub struct SweepOutcome {
    pub scanned: usize,
    pub confirmed: usize,
    pub failed: usize,
}

/// One sweep pass over all stale non-terminal claims.
pub async fn sweep_stale_claims(
    store: &dyn ClaimStore,
    chain: &dyn FaucetChain,
) -> Result<SweepOutcome, StoreError> {
    let cutoff = Utc::now() - Duration::seconds(STALENESS_SECONDS);
    let stale = store.list_stale(cutoff).await?;

    let mut outcome = SweepOutcome {
        scanned: stale.len(),
        ..Default::default()
    };

    for claim in stale {
        let receipt = match (&claim.status, claim.tx_hash.as_deref()) {
            (ClaimStatus::Submitted, Some(tx_hash)) => {
                match chain.receipt_status(claim.chain_id, tx_hash).await {
                    Ok(receipt) => receipt,
                    Err(err) => {
                        warn!(claim_id = claim.id, %tx_hash, "Receipt read failed during sweep: {err}");
                        None
                    }
                }
            }
            _ => None,
        };

        match resolve_stale_claim(claim.status, claim.tx_hash.as_deref(), receipt) {
            StaleResolution::Confirm => {
                if store
                    .transition(
                        claim.id,
                        &[ClaimStatus::Submitted],
                        ClaimStatus::Confirmed,
                        None,
                        None,
                    )
                    .await?
                    .is_some()
                {
                    info!(claim_id = claim.id, "Recovered stale claim to confirmed");
                    outcome.confirmed += 1;
                }
            }
            StaleResolution::Fail(message) => {
                if store
                    .transition(
                        claim.id,
                        &[
                            ClaimStatus::Pending,
                            ClaimStatus::Submitting,
                            ClaimStatus::Submitted,
                        ],
                        ClaimStatus::Failed,
                        None,
                        Some(message.clone()),
                    )
                    .await?
                    .is_some()
                {
                    warn!(claim_id = claim.id, "Failed stale claim: {message}");
                    outcome.failed += 1;
                }
            }
        }
    }

    Ok(outcome)
}

/// Background loop driving [`sweep_stale_claims`] on a fixed interval.
pub async fn sweep_loop(
    store: std::sync::Arc<dyn ClaimStore>,
    chain: std::sync::Arc<dyn FaucetChain>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting stale-claim sweep loop");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(_) => {
                        if *shutdown.borrow() {
                            info!("Sweep loop shutdown signal received");
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Shutdown channel closed unexpectedly. Exiting sweep loop");
                        break;
                    }
                }
            }
            _ = sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECONDS)) => {
                match sweep_stale_claims(store.as_ref(), chain.as_ref()).await {
                    Ok(outcome) if outcome.scanned > 0 => {
                        info!(
                            scanned = outcome.scanned,
                            confirmed = outcome.confirmed,
                            failed = outcome.failed,
                            "Stale-claim sweep complete"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Stale-claim sweep failed: {err}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::processor::{ChainCallError, SubmitError};
    use crate::claims::testing::MemoryClaimStore;
    use alloy::primitives::Address;
    use std::sync::Mutex;

    struct ReceiptChain {
        receipt: Mutex<Result<Option<ReceiptOutcome>, ()>>,
    }

    impl ReceiptChain {
        fn with(receipt: Result<Option<ReceiptOutcome>, ()>) -> Self {
            Self {
                receipt: Mutex::new(receipt),
            }
        }
    }

    #[async_trait::async_trait]
    impl FaucetChain for ReceiptChain {
        fn supports(&self, _chain_id: u64) -> bool {
            true
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
            Err(SubmitError::new("not under test"))
        }

        async fn await_receipt(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<ReceiptOutcome, ChainCallError> {
            Err(ChainCallError::Timeout)
        }

        async fn receipt_status(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<Option<ReceiptOutcome>, ChainCallError> {
            self.receipt
                .lock()
                .unwrap()
                .clone()
                .map_err(|_| ChainCallError::Rpc("receipt read failed".to_string()))
        }
    }

    const RECIPIENT: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    #[test]
    fn resolution_table() {
        use ClaimStatus::*;
        assert_eq!(
            resolve_stale_claim(Submitted, Some("0xabc"), Some(ReceiptOutcome::Success)),
            StaleResolution::Confirm
        );
        assert!(matches!(
            resolve_stale_claim(Submitted, Some("0xabc"), Some(ReceiptOutcome::Reverted)),
            StaleResolution::Fail(_)
        ));
        assert!(matches!(
            resolve_stale_claim(Submitted, Some("0xabc"), None),
            StaleResolution::Fail(_)
        ));
        assert!(matches!(
            resolve_stale_claim(Submitted, None, None),
            StaleResolution::Fail(_)
        ));
        assert!(matches!(
            resolve_stale_claim(Pending, None, None),
            StaleResolution::Fail(_)
        ));
        assert!(matches!(
            resolve_stale_claim(Submitting, None, None),
            StaleResolution::Fail(_)
        ));
    }

    async fn stale_submitted_claim(store: &MemoryClaimStore) -> i64 {
        let claim = store
            .insert_claim("user-1", RECIPIENT, 8453)
            .await
            .expect("seed");
        store
            .transition(
                claim.id,
                &[ClaimStatus::Pending],
                ClaimStatus::Submitting,
                None,
                None,
            )
            .await
            .expect("transition")
            .expect("guard holds");
        store
            .transition(
                claim.id,
                &[ClaimStatus::Submitting],
                ClaimStatus::Submitted,
                Some("0xabc".to_string()),
                None,
            )
            .await
            .expect("transition")
            .expect("guard holds");
        store.backdate(claim.id, Utc::now() - Duration::seconds(300));
        claim.id
    }

    #[tokio::test]
    async fn crashed_mid_wait_claim_recovers_to_confirmed() {
        // Processor reached submitted with a hash, then "crashed": no
        // further processor calls. The sweep must finish the job.
        let store = MemoryClaimStore::new();
        let id = stale_submitted_claim(&store).await;

        let chain = ReceiptChain::with(Ok(Some(ReceiptOutcome::Success)));
        let outcome = sweep_stale_claims(&store, &chain).await.expect("sweep");
        assert_eq!(outcome.confirmed, 1);
        assert_eq!(store.get(id).status, ClaimStatus::Confirmed);
    }

    #[tokio::test]
    async fn absent_receipt_falls_through_to_failed() {
        let store = MemoryClaimStore::new();
        let id = stale_submitted_claim(&store).await;

        let chain = ReceiptChain::with(Ok(None));
        let outcome = sweep_stale_claims(&store, &chain).await.expect("sweep");
        assert_eq!(outcome.failed, 1);
        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Failed);
        assert!(claim.error.is_some());
    }

    #[tokio::test]
    async fn receipt_read_failure_falls_through_to_failed() {
        let store = MemoryClaimStore::new();
        let id = stale_submitted_claim(&store).await;

        let chain = ReceiptChain::with(Err(()));
        let outcome = sweep_stale_claims(&store, &chain).await.expect("sweep");
        assert_eq!(outcome.failed, 1);
        assert_eq!(store.get(id).status, ClaimStatus::Failed);
    }

    #[tokio::test]
    async fn stale_pending_claim_is_failed_without_receipt_read() {
        let store = MemoryClaimStore::new();
        let claim = store
            .insert_claim("user-1", RECIPIENT, 8453)
            .await
            .expect("seed");
        store.backdate(claim.id, Utc::now() - Duration::seconds(300));

        let chain = ReceiptChain::with(Ok(Some(ReceiptOutcome::Success)));
        let outcome = sweep_stale_claims(&store, &chain).await.expect("sweep");
        assert_eq!(outcome.failed, 1);
        assert_eq!(store.get(claim.id).status, ClaimStatus::Failed);
    }

    #[tokio::test]
    async fn fresh_and_terminal_claims_are_untouched() {
        let store = MemoryClaimStore::new();
        let fresh = store
            .insert_claim("user-1", RECIPIENT, 8453)
            .await
            .expect("seed");

        let chain = ReceiptChain::with(Ok(None));
        let outcome = sweep_stale_claims(&store, &chain).await.expect("sweep");
        assert_eq!(outcome.scanned, 0);
        assert_eq!(store.get(fresh.id).status, ClaimStatus::Pending);
    }
}
