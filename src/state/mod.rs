use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;
use serde_json::Value;

use crate::balance::BalanceReader;
use crate::chain::ChainClients;
use crate::claims::ClaimService;
use crate::config::CacheConfig;

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<DatabaseConnection>,
    pub cache: Arc<ApiCache>,
    pub chains: Arc<ChainClients>,
    pub balances: Arc<BalanceReader>,
    pub claims: Arc<ClaimService>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: Arc<DatabaseConnection>,
        cache: Arc<ApiCache>,
        chains: Arc<ChainClients>,
        balances: Arc<BalanceReader>,
        claims: Arc<ClaimService>,
    ) -> Self {
        assert!(
            cache.eligibility_capacity >= 100,
            "Eligibility cache capacity must be configured"
        );
        Self {
            database,
            cache,
            chains,
            balances,
            claims,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    /// Eligibility reports keyed by `user_id:channel_id`; serialized report
    /// JSON so the HTTP layer can hand it back without re-evaluating.
    pub eligibility: Cache<String, Value>,
    pub eligibility_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.eligibility_max_capacity >= 100,
            "Eligibility cache capacity threshold"
        );

        let eligibility = Cache::builder()
            .max_capacity(config.eligibility_max_capacity)
            .time_to_live(Duration::from_secs(config.eligibility_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.eligibility_ttl_seconds / 2 + 1))
            .build();

        Self {
            eligibility,
            eligibility_capacity: config.eligibility_max_capacity,
        }
    }

    pub fn eligibility_key(user_id: &str, channel_id: &str) -> String {
        format!("{user_id}:{channel_id}")
    }
}
