//! Chain Client Provider: resolves a chain id from the configured
//! allow-list to a cached read client or sponsor-signing write client.
//!
//! The cache is an explicit process-scoped object owned here and shared by
//! `Arc`, never ambient module state. Clients are constructed lazily and
//! live for the process lifetime; RPC endpoints are static per deployment,
//! so there is no invalidation.

use std::collections::HashMap;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ChainConfig;

pub mod contracts;

#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("unsupported chain id {0}")]
    UnsupportedChain(u64),
    #[error("no sponsor signing key configured")]
    MissingSponsorKey,
    #[error("no faucet contract configured for chain {0}")]
    MissingFaucetContract(u64),
    #[error("failed to build RPC client for chain {chain_id}: {reason}")]
    Endpoint { chain_id: u64, reason: String },
}

struct ChainEntry {
    config: ChainConfig,
    faucet_address: Option<Address>,
}

pub struct ChainClients {
    chains: HashMap<u64, ChainEntry>,
    sponsor_key: Option<PrivateKeySigner>,
    read_clients: RwLock<HashMap<u64, DynProvider>>,
    sponsor_clients: RwLock<HashMap<u64, DynProvider>>,
}

impl ChainClients {
    pub fn new(chains: &[ChainConfig], sponsor_key_hex: Option<&str>) -> Result<Self> {
        assert!(!chains.is_empty(), "Chain allow-list cannot be empty");
        assert!(chains.len() <= 64, "Chain allow-list exceeds bounds");

        let sponsor_key = match sponsor_key_hex {
            Some(hex) => Some(
                hex.parse::<PrivateKeySigner>()
                    .context("Invalid sponsor private key")?,
            ),
            None => None,
        };

        let mut table = HashMap::with_capacity(chains.len());
        for chain in chains {
            let faucet_address = match &chain.faucet_address {
                Some(raw) => Some(
                    raw.parse::<Address>()
                        .with_context(|| format!("Invalid faucet address for chain {}", chain.chain_id))?,
                ),
                None => None,
            };
            table.insert(
                chain.chain_id,
                ChainEntry {
                    config: chain.clone(),
                    faucet_address,
                },
            );
        }

        Ok(Self {
            chains: table,
            sponsor_key,
            read_clients: RwLock::new(HashMap::new()),
            sponsor_clients: RwLock::new(HashMap::new()),
        })
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn display_name(&self, chain_id: u64) -> Option<&str> {
        self.chains.get(&chain_id).map(|e| e.config.name.as_str())
    }

    pub fn request_timeout(&self, chain_id: u64) -> Duration {
        self.chains
            .get(&chain_id)
            .map(|e| e.config.request_timeout())
            .unwrap_or(Duration::from_secs(10))
    }

    pub fn faucet_address(&self, chain_id: u64) -> Result<Address, ChainClientError> {
        let entry = self
            .chains
            .get(&chain_id)
            .ok_or(ChainClientError::UnsupportedChain(chain_id))?;
        entry
            .faucet_address
            .ok_or(ChainClientError::MissingFaucetContract(chain_id))
    }

    pub fn sponsor_address(&self) -> Option<Address> {
        self.sponsor_key.as_ref().map(|key| key.address())
    }

    /// JSON-RPC read client for the chain, cached for process lifetime.
    pub async fn read_client(&self, chain_id: u64) -> Result<DynProvider, ChainClientError> {
        let entry = self
            .chains
            .get(&chain_id)
            .ok_or(ChainClientError::UnsupportedChain(chain_id))?;

        if let Some(client) = self.read_clients.read().await.get(&chain_id) {
            return Ok(client.clone());
        }

        let mut clients = self.read_clients.write().await;
        // Lost the race to another builder: reuse theirs.
        if let Some(client) = clients.get(&chain_id) {
            return Ok(client.clone());
        }

        let url = entry
            .config
            .rpc_url
            .parse()
            .map_err(|err| ChainClientError::Endpoint {
                chain_id,
                reason: format!("{err}"),
            })?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        debug!(chain_id, "Constructed read client");
        clients.insert(chain_id, provider.clone());
        Ok(provider)
    }

    /// Sponsor-signing write client for the chain. Absence of the sponsor
    /// key is a hard configuration error, never a runtime fallback.
    pub async fn sponsor_client(&self, chain_id: u64) -> Result<DynProvider, ChainClientError> {
        let entry = self
            .chains
            .get(&chain_id)
            .ok_or(ChainClientError::UnsupportedChain(chain_id))?;
        let signer = self
            .sponsor_key
            .as_ref()
            .ok_or(ChainClientError::MissingSponsorKey)?;

        if let Some(client) = self.sponsor_clients.read().await.get(&chain_id) {
            return Ok(client.clone());
        }

        let mut clients = self.sponsor_clients.write().await;
        if let Some(client) = clients.get(&chain_id) {
            return Ok(client.clone());
        }

        let url = entry
            .config
            .rpc_url
            .parse()
            .map_err(|err| ChainClientError::Endpoint {
                chain_id,
                reason: format!("{err}"),
            })?;
        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();
        debug!(chain_id, "Constructed sponsor client");
        clients.insert(chain_id, provider.clone());
        Ok(provider)
    }
}
