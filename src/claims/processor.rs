//! Claim Processor: drives one claim from `pending` to a terminal state.
//!
//! The state machine is monotonic. The only ambiguous outcome, a receipt
//! wait that times out, leaves the claim `submitted` for the stale-claim
//! sweep to resolve against the chain.

use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use alloy::providers::Provider;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::chain::contracts::ISponsoredFaucet;
use crate::chain::{ChainClientError, ChainClients};
use crate::claims::{ClaimStatus, ClaimStore, StoreError};

pub const MAX_SUBMIT_ATTEMPTS: u32 = 4;
pub const BACKOFF_BASE_MS: u64 = 500;
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Poll spacing while waiting for a receipt inside [`RECEIPT_TIMEOUT`].
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ChainCallError {
    #[error(transparent)]
    Client(#[from] ChainClientError),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("call timed out")]
    Timeout,
    #[error("malformed transaction hash '{0}'")]
    BadHash(String),
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct SubmitError {
    pub message: String,
}

impl SubmitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    Reverted,
}

/// On-chain boundary for the claim pipeline. Production uses
/// [`AlloyFaucetChain`]; tests script this trait.
#[async_trait::async_trait]
pub trait FaucetChain: Send + Sync {
    fn supports(&self, chain_id: u64) -> bool;

    async fn already_claimed(
        &self,
        chain_id: u64,
        recipient: Address,
    ) -> Result<bool, ChainCallError>;

    async fn submit_claim(
        &self,
        chain_id: u64,
        recipient: Address,
    ) -> Result<String, SubmitError>;

    /// Block until the transaction has a receipt or [`RECEIPT_TIMEOUT`]
    /// elapses.
    async fn await_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<ReceiptOutcome, ChainCallError>;

    /// One-shot receipt read used by the reconciler. `Ok(None)` means no
    /// receipt is known yet.
    async fn receipt_status(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<Option<ReceiptOutcome>, ChainCallError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt after backoff: timeouts, connection drops,
    /// nonce and sequencing races.
    Transient,
    /// Retrying cannot help: reverts, rejected payloads, signer problems.
    Definitive,
}

/// The named retry policy. Classification is by message content because
/// RPC providers disagree on error codes for the same condition.
pub fn classify_submission_error(message: &str) -> RetryClass {
    let lower = message.to_ascii_lowercase();
    const DEFINITIVE: &[&str] = &[
        "revert",
        "execution reverted",
        "already claimed",
        "insufficient funds",
        "invalid signature",
        "invalid sender",
        "unsupported chain",
        "sponsor key",
        "exceeds allowance",
    ];
    if DEFINITIVE.iter().any(|needle| lower.contains(needle)) {
        RetryClass::Definitive
    } else {
        RetryClass::Transient
    }
}

/// Exponential backoff: `base * 2^attempt`, starting at attempt 0.
pub fn backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1u64 << attempt.min(16);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(multiplier))
}

/// Run one claim to completion. Idempotent: a claim in any state other
/// than `pending` is skipped, so duplicate scheduling is harmless.
pub async fn process_claim(
    store: &dyn ClaimStore,
    chain: &dyn FaucetChain,
    claim_id: i64,
) -> Result<(), StoreError> {
    let Some(claim) = store.find_by_id(claim_id).await? else {
        warn!(claim_id, "Scheduled claim no longer exists");
        return Ok(());
    };
    if claim.status != ClaimStatus::Pending {
        warn!(
            claim_id,
            status = claim.status.as_str(),
            "Skipping claim not in pending state"
        );
        return Ok(());
    }

    let Some(claim) = store
        .transition(
            claim_id,
            &[ClaimStatus::Pending],
            ClaimStatus::Submitting,
            None,
            None,
        )
        .await?
    else {
        warn!(claim_id, "Lost claim to a concurrent processor");
        return Ok(());
    };

    let chain_id = claim.chain_id;
    let recipient = match claim.recipient_address.parse::<Address>() {
        Ok(recipient) => recipient,
        Err(_) => {
            fail(store, claim_id, "stored recipient address is malformed").await?;
            return Ok(());
        }
    };

    // A successful prior attempt may exist on-chain without a local
    // record. An unreadable answer here also aborts: submitting blind
    // risks a wasted or duplicate sponsor-paid transaction.
    match chain.already_claimed(chain_id, recipient).await {
        Ok(true) => {
            fail(store, claim_id, "already claimed on-chain").await?;
            return Ok(());
        }
        Ok(false) => {}
        Err(err) => {
            fail(store, claim_id, &format!("pre-submit check failed: {err}")).await?;
            return Ok(());
        }
    }

    let mut tx_hash = None;
    for attempt in 0..MAX_SUBMIT_ATTEMPTS {
        match chain.submit_claim(chain_id, recipient).await {
            Ok(hash) => {
                tx_hash = Some(hash);
                break;
            }
            Err(err) => match classify_submission_error(&err.message) {
                RetryClass::Definitive => {
                    fail(store, claim_id, &err.message).await?;
                    return Ok(());
                }
                RetryClass::Transient if attempt + 1 == MAX_SUBMIT_ATTEMPTS => {
                    fail(
                        store,
                        claim_id,
                        &format!(
                            "submission failed after {MAX_SUBMIT_ATTEMPTS} attempts: {}",
                            err.message
                        ),
                    )
                    .await?;
                    return Ok(());
                }
                RetryClass::Transient => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        claim_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient submission error, backing off: {}",
                        err.message
                    );
                    sleep(delay).await;
                }
            },
        }
    }
    // Loop either set the hash or returned.
    let Some(tx_hash) = tx_hash else {
        return Ok(());
    };

    // Persist the hash before waiting: it is the reconciler's recovery
    // anchor if this process dies mid-wait.
    if store
        .transition(
            claim_id,
            &[ClaimStatus::Submitting],
            ClaimStatus::Submitted,
            Some(tx_hash.clone()),
            None,
        )
        .await?
        .is_none()
    {
        warn!(claim_id, "Claim left submitting state unexpectedly");
        return Ok(());
    }
    info!(claim_id, %tx_hash, "Claim transaction submitted");

    match chain.await_receipt(chain_id, &tx_hash).await {
        Ok(ReceiptOutcome::Success) => {
            store
                .transition(
                    claim_id,
                    &[ClaimStatus::Submitted],
                    ClaimStatus::Confirmed,
                    None,
                    None,
                )
                .await?;
            info!(claim_id, %tx_hash, "Claim confirmed");
        }
        Ok(ReceiptOutcome::Reverted) => {
            fail(store, claim_id, "transaction reverted on-chain").await?;
        }
        // Ambiguous: the transaction may still land. Leave the claim
        // submitted; only the stale sweep resolves it from here.
        Err(err) => {
            info!(claim_id, %tx_hash, "Receipt wait unresolved, deferring to sweep: {err}");
        }
    }

    Ok(())
}

async fn fail(store: &dyn ClaimStore, claim_id: i64, message: &str) -> Result<(), StoreError> {
    warn!(claim_id, "Claim failed: {message}");
    store
        .transition(
            claim_id,
            &[
                ClaimStatus::Pending,
                ClaimStatus::Submitting,
                ClaimStatus::Submitted,
            ],
            ClaimStatus::Failed,
            None,
            Some(message.to_string()),
        )
        .await?;
    Ok(())
}

/// [`FaucetChain`] over the cached alloy providers, every call bounded by
/// an explicit timeout.
pub struct AlloyFaucetChain {
    chains: std::sync::Arc<ChainClients>,
}

impl AlloyFaucetChain {
    pub fn new(chains: std::sync::Arc<ChainClients>) -> Self {
        Self { chains }
    }

    fn parse_hash(tx_hash: &str) -> Result<TxHash, ChainCallError> {
        tx_hash
            .parse::<TxHash>()
            .map_err(|_| ChainCallError::BadHash(tx_hash.to_string()))
    }
}

#[async_trait::async_trait]
impl FaucetChain for AlloyFaucetChain {
    fn supports(&self, chain_id: u64) -> bool {
        self.chains.is_supported(chain_id)
    }

    async fn already_claimed(
        &self,
        chain_id: u64,
        recipient: Address,
    ) -> Result<bool, ChainCallError> {
        let provider = self.chains.read_client(chain_id).await?;
        let faucet = self.chains.faucet_address(chain_id)?;
        let contract = ISponsoredFaucet::new(faucet, provider);
        let claimed = timeout(
            self.chains.request_timeout(chain_id),
            contract.hasClaimed(recipient).call(),
        )
        .await
        .map_err(|_| ChainCallError::Timeout)?
        .map_err(|err| ChainCallError::Rpc(err.to_string()))?;
        Ok(claimed)
    }

    async fn submit_claim(
        &self,
        chain_id: u64,
        recipient: Address,
    ) -> Result<String, SubmitError> {
        let provider = self
            .chains
            .sponsor_client(chain_id)
            .await
            .map_err(|err| SubmitError::new(err.to_string()))?;
        let faucet = self
            .chains
            .faucet_address(chain_id)
            .map_err(|err| SubmitError::new(err.to_string()))?;
        let contract = ISponsoredFaucet::new(faucet, provider);
        let pending = timeout(SUBMIT_TIMEOUT, contract.claimFor(recipient).send())
            .await
            .map_err(|_| SubmitError::new("submission timed out"))?
            .map_err(|err| SubmitError::new(err.to_string()))?;
        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn await_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<ReceiptOutcome, ChainCallError> {
        let provider = self.chains.read_client(chain_id).await?;
        let hash = Self::parse_hash(tx_hash)?;
        let wait = async {
            loop {
                let receipt = provider
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(|err| ChainCallError::Rpc(err.to_string()))?;
                if let Some(receipt) = receipt {
                    return Ok(if receipt.status() {
                        ReceiptOutcome::Success
                    } else {
                        ReceiptOutcome::Reverted
                    });
                }
                sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };
        timeout(RECEIPT_TIMEOUT, wait)
            .await
            .map_err(|_| ChainCallError::Timeout)?
    }

    async fn receipt_status(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<Option<ReceiptOutcome>, ChainCallError> {
        let provider = self.chains.read_client(chain_id).await?;
        let hash = Self::parse_hash(tx_hash)?;
        let receipt = timeout(
            self.chains.request_timeout(chain_id),
            provider.get_transaction_receipt(hash),
        )
        .await
        .map_err(|_| ChainCallError::Timeout)?
        .map_err(|err| ChainCallError::Rpc(err.to_string()))?;
        Ok(receipt.map(|receipt| {
            if receipt.status() {
                ReceiptOutcome::Success
            } else {
                ReceiptOutcome::Reverted
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::testing::MemoryClaimStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn retry_classification_table() {
        let cases = [
            ("request timed out", RetryClass::Transient),
            ("connection reset by peer", RetryClass::Transient),
            ("nonce too low", RetryClass::Transient),
            ("replacement transaction underpriced", RetryClass::Transient),
            ("429 Too Many Requests", RetryClass::Transient),
            ("execution reverted: claim window closed", RetryClass::Definitive),
            ("already claimed", RetryClass::Definitive),
            ("insufficient funds for gas * price + value", RetryClass::Definitive),
            ("invalid sender", RetryClass::Definitive),
            ("chain 999 is not supported", RetryClass::Definitive),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_submission_error(message), expected, "{message}");
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4000));
    }

    /// Scripted chain: pops submit results off a list, counts calls.
    struct ScriptedChain {
        already_claimed: bool,
        submit_results: Mutex<Vec<Result<String, SubmitError>>>,
        submit_calls: AtomicUsize,
        receipt: Result<ReceiptOutcome, ()>,
    }

    impl ScriptedChain {
        fn happy() -> Self {
            Self {
                already_claimed: false,
                submit_results: Mutex::new(vec![Ok("0xabc".to_string())]),
                submit_calls: AtomicUsize::new(0),
                receipt: Ok(ReceiptOutcome::Success),
            }
        }
    }

    #[async_trait::async_trait]
    impl FaucetChain for ScriptedChain {
        fn supports(&self, _chain_id: u64) -> bool {
            true
        }

        async fn already_claimed(
            &self,
            _chain_id: u64,
            _recipient: Address,
        ) -> Result<bool, ChainCallError> {
            Ok(self.already_claimed)
        }

        async fn submit_claim(
            &self,
            _chain_id: u64,
            _recipient: Address,
        ) -> Result<String, SubmitError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.submit_results.lock().unwrap();
            if results.is_empty() {
                return Err(SubmitError::new("request timed out"));
            }
            results.remove(0)
        }

        async fn await_receipt(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<ReceiptOutcome, ChainCallError> {
            self.receipt.map_err(|_| ChainCallError::Timeout)
        }

        async fn receipt_status(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> Result<Option<ReceiptOutcome>, ChainCallError> {
            Ok(self.receipt.ok())
        }
    }

    const RECIPIENT: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    async fn seeded_store() -> (MemoryClaimStore, i64) {
        let store = MemoryClaimStore::new();
        let claim = store
            .insert_claim("user-1", RECIPIENT, 8453)
            .await
            .expect("seed");
        (store, claim.id)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reaches_confirmed_with_hash_persisted() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain::happy();
        process_claim(&store, &chain, id).await.expect("process");

        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Confirmed);
        assert_eq!(claim.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_chain_already_claimed_fails_without_submitting() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            already_claimed: true,
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Failed);
        assert_eq!(claim.error.as_deref(), Some("already claimed on-chain"));
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_then_succeed() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            submit_results: Mutex::new(vec![
                Err(SubmitError::new("request timed out")),
                Err(SubmitError::new("nonce too low")),
                Ok("0xabc".to_string()),
            ]),
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        assert_eq!(store.get(id).status, ClaimStatus::Confirmed);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            submit_results: Mutex::new(vec![]),
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Failed);
        assert_eq!(
            chain.submit_calls.load(Ordering::SeqCst),
            MAX_SUBMIT_ATTEMPTS as usize
        );
        assert!(claim.error.unwrap().contains("after 4 attempts"));
    }

    #[tokio::test]
    async fn definitive_error_aborts_on_first_attempt() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            submit_results: Mutex::new(vec![Err(SubmitError::new(
                "execution reverted: not eligible",
            ))]),
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Failed);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receipt_timeout_leaves_claim_submitted() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            receipt: Err(()),
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        let claim = store.get(id);
        assert_eq!(claim.status, ClaimStatus::Submitted);
        assert_eq!(claim.tx_hash.as_deref(), Some("0xabc"));
        assert!(claim.error.is_none());
    }

    #[tokio::test]
    async fn reverted_receipt_fails_the_claim() {
        let (store, id) = seeded_store().await;
        let chain = ScriptedChain {
            receipt: Ok(ReceiptOutcome::Reverted),
            ..ScriptedChain::happy()
        };
        process_claim(&store, &chain, id).await.expect("process");

        assert_eq!(store.get(id).status, ClaimStatus::Failed);
    }

    #[tokio::test]
    async fn non_pending_claim_is_skipped() {
        let (store, id) = seeded_store().await;
        store
            .transition(
                id,
                &[ClaimStatus::Pending],
                ClaimStatus::Confirmed,
                None,
                None,
            )
            .await
            .expect("transition")
            .expect("guard holds");

        let chain = ScriptedChain::happy();
        process_claim(&store, &chain, id).await.expect("process");
        assert_eq!(store.get(id).status, ClaimStatus::Confirmed);
        assert_eq!(chain.submit_calls.load(Ordering::SeqCst), 0);
    }
}
