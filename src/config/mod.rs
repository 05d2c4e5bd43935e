use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chains: Vec<ChainConfig>,
    pub sponsor: SponsorConfig,
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("TOKENGATE_CONFIG")
            .unwrap_or_else(|_| "config/tokengate.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("TOKENGATE_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/tokengate.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(
            !self.chains.is_empty(),
            "At least one chain must be configured"
        );
        assert!(
            self.chains.len() <= 64,
            "Chain allow-list exceeds defensive limit"
        );
        for chain in &self.chains {
            chain.ensure_bounds()?;
        }
        let mut ids: Vec<u64> = self.chains.iter().map(|c| c.chain_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert!(
            ids.len() == self.chains.len(),
            "Duplicate chain id in allow-list"
        );
        self.sponsor.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

/// One entry of the chain allow-list. Anything outside this table is
/// rejected as UnsupportedChain before any network call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// Address of the sponsored faucet contract on this chain, if any
    pub faucet_address: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(10_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(self.chain_id > 0, "Chain id must be positive");
        assert!(!self.name.is_empty(), "Chain name must be provided");
        assert!(!self.rpc_url.is_empty(), "Chain RPC URL must be provided");
        assert!(
            self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://"),
            "Chain RPC URL must be HTTP(S)"
        );
        if let Some(faucet) = &self.faucet_address {
            assert!(
                faucet.len() == 42 && faucet.starts_with("0x"),
                "Faucet address must be a 0x-prefixed 20-byte hex address"
            );
        }
        let _ = self.request_timeout();
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SponsorConfig {
    /// Hex-encoded private key of the sponsor account. Absence is a hard
    /// configuration error for any operation that needs a write client.
    pub private_key: Option<String>,
}

impl SponsorConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if let Some(key) = &self.private_key {
            let stripped = key.strip_prefix("0x").unwrap_or(key);
            assert!(
                stripped.len() == 64,
                "Sponsor private key must be 32 bytes of hex"
            );
            hex::decode(stripped).context("Sponsor private key is not valid hex")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub token_metadata_max_capacity: u64,
    pub token_metadata_ttl_seconds: u64,
    pub eligibility_max_capacity: u64,
    pub eligibility_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.token_metadata_max_capacity >= 100,
            "Token metadata cache capacity must be at least 100"
        );
        assert!(
            self.token_metadata_ttl_seconds <= 86_400,
            "Token metadata cache TTL cannot exceed one day"
        );
        assert!(
            self.eligibility_max_capacity >= 100,
            "Eligibility cache capacity must be at least 100"
        );
        assert!(
            self.eligibility_ttl_seconds <= 3_600,
            "Eligibility cache TTL cannot exceed one hour"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
