mod accounts;
mod balance;
mod chain;
mod claims;
mod config;
mod eligibility;
mod entities;
mod http;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::balance::{BalanceReader, BalanceSource};
use crate::chain::ChainClients;
use crate::claims::processor::{AlloyFaucetChain, FaucetChain};
use crate::claims::store::SeaOrmClaimStore;
use crate::claims::{ClaimService, ClaimStore};
use crate::config::ApiConfig;
use crate::state::{ApiCache, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;
    let database = Arc::new(database);

    let chains = Arc::new(
        ChainClients::new(&config.chains, config.sponsor.private_key.as_deref())
            .context("Failed to initialize chain clients")?,
    );
    if chains.sponsor_address().is_none() {
        info!("No sponsor key configured; claim submission will be rejected");
    }

    let balances = Arc::new(BalanceReader::new(Arc::clone(&chains), &config.cache));
    let balance_source: Arc<dyn BalanceSource> = balances.clone();

    let store: Arc<dyn ClaimStore> = Arc::new(SeaOrmClaimStore::new(database.clone()));
    let faucet_chain: Arc<dyn FaucetChain> = Arc::new(AlloyFaucetChain::new(Arc::clone(&chains)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let claims = Arc::new(ClaimService::start(
        Arc::clone(&store),
        Arc::clone(&faucet_chain),
        &chains.chain_ids(),
        shutdown_rx.clone(),
    ));

    let recheck_handle = tokio::spawn(eligibility::recheck_loop(
        database.clone(),
        balance_source,
        Arc::clone(&chains),
        shutdown_rx.clone(),
    ));
    let sweep_handle = tokio::spawn(claims::reconciler::sweep_loop(
        Arc::clone(&store),
        Arc::clone(&faucet_chain),
        shutdown_rx,
    ));

    let cache = Arc::new(ApiCache::new(&config.cache));
    let app_state = AppState::new(
        database.clone(),
        Arc::clone(&cache),
        Arc::clone(&chains),
        balances,
        claims,
    );

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Tokengate API listening on {local_addr}");

    let router: Router = http::router(app_state.clone());
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = recheck_handle.await {
        error!("Recheck task join error: {join_err}");
    }
    if let Err(join_err) = sweep_handle.await {
        error!("Sweep task join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &ApiConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.database.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
