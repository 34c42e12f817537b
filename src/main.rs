// src/main.rs
mod api;
mod cache;
mod config;
mod db;
mod error;
mod file_store;
mod models;
mod performance;
mod portfolio;
mod quotes;
mod store;

use crate::cache::PriceCache;
use crate::config::{Config, StoreBackend};
use crate::db::ScyllaLotStore;
use crate::file_store::FileLotStore;
use crate::performance::PerformanceAnalyzer;
use crate::portfolio::PortfolioManager;
use crate::quotes::AlphaVantage;
use crate::store::LotStore;
use env_logger::{Builder, Env};
use log::{error, info};
use std::sync::Arc;

async fn open_store(backend: &StoreBackend) -> error::Result<Arc<dyn LotStore>> {
    match backend {
        StoreBackend::File(path) => Ok(Arc::new(FileLotStore::open(path).await?)),
        StoreBackend::Scylla(node) => {
            let session = db::init(node).await?;
            Ok(Arc::new(ScyllaLotStore::new(session).await?))
        }
    }
}

async fn run(config: Config) -> error::Result<()> {
    let store = open_store(&config.store).await?;
    info!("Lot store ready ({:?}).", config.store);

    let source = Arc::new(AlphaVantage::new(
        config.api_key.clone(),
        config.fetch_timeout,
    )?);
    let portfolio = Arc::new(PortfolioManager::new(store));
    let cache = Arc::new(PriceCache::new(
        source,
        config.cache_ttl,
        config.fetch_timeout,
    ));
    let analyzer = Arc::new(PerformanceAnalyzer::new(portfolio.clone(), cache));

    let api = api::routes(portfolio, analyzer);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api).run(config.bind_addr).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    if let Err(e) = run(config).await {
        error!("Failed to start lot tracker: {}", e);
    }
}
