//! Balance Reader: ERC-20 balance and metadata reads for one
//! address/token/chain triple.
//!
//! A single read failure is a typed, recoverable value so callers can keep
//! sibling reads alive. Metadata degrades per field and never blocks a
//! balance comparison.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use moka::future::Cache;
use thiserror::Error;
use tracing::warn;

use crate::chain::contracts::IERC20;
use crate::chain::{ChainClientError, ChainClients};
use crate::config::CacheConfig;

pub const DEFAULT_DECIMALS: u8 = 18;
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";
pub const UNKNOWN_NAME: &str = "Unknown Token";

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error(transparent)]
    Client(#[from] ChainClientError),
    #[error("balance read failed on chain {chain_id}: {reason}")]
    Rpc { chain_id: u64, reason: String },
    #[error("balance read timed out on chain {chain_id}")]
    Timeout { chain_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn unknown() -> Self {
        Self {
            symbol: UNKNOWN_SYMBOL.to_string(),
            name: UNKNOWN_NAME.to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

/// Seam between the eligibility engine and the chain. The production
/// implementation is [`BalanceReader`]; tests substitute a counting mock.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn read_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> Result<U256, BalanceError>;

    /// Best-effort; each field falls back independently.
    async fn read_token_metadata(&self, chain_id: u64, token: Address) -> TokenMetadata;
}

pub struct BalanceReader {
    chains: Arc<ChainClients>,
    metadata: Cache<(u64, Address), TokenMetadata>,
}

impl BalanceReader {
    pub fn new(chains: Arc<ChainClients>, cache: &CacheConfig) -> Self {
        let metadata = Cache::builder()
            .max_capacity(cache.token_metadata_max_capacity)
            .time_to_live(Duration::from_secs(cache.token_metadata_ttl_seconds))
            .build();
        Self { chains, metadata }
    }

    async fn fetch_metadata(&self, chain_id: u64, token: Address) -> TokenMetadata {
        let provider = match self.chains.read_client(chain_id).await {
            Ok(provider) => provider,
            Err(err) => {
                warn!(chain_id, %token, "Metadata read skipped: {err}");
                return TokenMetadata::unknown();
            }
        };

        let timeout = self.chains.request_timeout(chain_id);
        let contract = IERC20::new(token, provider);

        let symbol = match tokio::time::timeout(timeout, contract.symbol().call()).await {
            Ok(Ok(value)) => value,
            _ => UNKNOWN_SYMBOL.to_string(),
        };
        let name = match tokio::time::timeout(timeout, contract.name().call()).await {
            Ok(Ok(value)) => value,
            _ => UNKNOWN_NAME.to_string(),
        };
        let decimals = match tokio::time::timeout(timeout, contract.decimals().call()).await {
            Ok(Ok(value)) => value,
            _ => DEFAULT_DECIMALS,
        };

        TokenMetadata {
            symbol,
            name,
            decimals,
        }
    }
}

#[async_trait]
impl BalanceSource for BalanceReader {
    async fn read_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> Result<U256, BalanceError> {
        let provider = self.chains.read_client(chain_id).await?;
        let timeout = self.chains.request_timeout(chain_id);
        let contract = IERC20::new(token, provider);

        match tokio::time::timeout(timeout, contract.balanceOf(owner).call()).await {
            Ok(Ok(balance)) => Ok(balance),
            Ok(Err(err)) => Err(BalanceError::Rpc {
                chain_id,
                reason: err.to_string(),
            }),
            Err(_) => Err(BalanceError::Timeout { chain_id }),
        }
    }

    async fn read_token_metadata(&self, chain_id: u64, token: Address) -> TokenMetadata {
        if let Some(cached) = self.metadata.get(&(chain_id, token)).await {
            return cached;
        }
        let fetched = self.fetch_metadata(chain_id, token).await;
        self.metadata.insert((chain_id, token), fetched.clone()).await;
        fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_metadata_uses_safe_defaults() {
        let metadata = TokenMetadata::unknown();
        assert_eq!(metadata.decimals, DEFAULT_DECIMALS);
        assert_eq!(metadata.symbol, UNKNOWN_SYMBOL);
        assert_eq!(metadata.name, UNKNOWN_NAME);
    }
}
