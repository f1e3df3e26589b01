use std::path::Path;
use std::sync::Arc;

use vivino_scraper::api::{self, AppState};
use vivino_scraper::browser::ChromiumSessionFactory;
use vivino_scraper::enrich::EnrichmentClient;
use vivino_scraper::extract::ExtractionEngine;
use vivino_scraper::proxy::{ProxyCredential, ProxyPool};
use vivino_scraper::{Config, SessionPool};

#[tokio::main]
async fn main() -> vivino_scraper::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::load(Path::new("config.toml"))?;

    tracing::info!("Starting wine catalog scraper");

    let proxies = build_proxy_pool(&config).await?;

    let factory = Arc::new(ChromiumSessionFactory::new(config.session.clone()));
    let pool = Arc::new(SessionPool::new(
        factory,
        proxies,
        config.pool.max_sessions,
    ));

    let engine = Arc::new(ExtractionEngine::new(config.engine_settings()));

    let enrichment = match config.enrichment_api_key() {
        Some(key) => Some(Arc::new(EnrichmentClient::new(
            key,
            config.enrichment_settings(),
        ))),
        None => {
            tracing::warn!("No enrichment API key configured; /description and /pairings disabled");
            None
        }
    };

    let state = AppState {
        pool: pool.clone(),
        engine,
        enrichment,
        extraction_retry: config.extraction_retry(),
        enrichment_retry: config.enrichment_retry(),
    };

    let result = api::serve(state, config.server.port).await;

    pool.shutdown().await;
    tracing::info!("Wine catalog scraper stopped");
    result
}

/// Assemble the proxy pool from the static config list or the provider API.
/// Returns `None` when proxying is disabled or unconfigured; sessions then
/// run without a proxy binding.
async fn build_proxy_pool(config: &Config) -> vivino_scraper::error::Result<Option<Arc<ProxyPool>>> {
    if !config.proxy.enabled {
        tracing::info!("Proxy rotation disabled by configuration");
        return Ok(None);
    }

    if !config.proxy.static_list.is_empty() {
        let credentials = config
            .proxy
            .static_list
            .iter()
            .map(|entry| ProxyCredential::parse(entry))
            .collect::<vivino_scraper::error::Result<Vec<_>>>()?;
        tracing::info!("Using {} statically configured proxies", credentials.len());
        return Ok(Some(Arc::new(ProxyPool::from_credentials(credentials))));
    }

    match config.proxy_api_key() {
        Some(key) => {
            let pool = ProxyPool::new(config.proxy.provider_url.clone(), Some(key));
            let count = pool.load().await?;
            tracing::info!("Proxy provider supplied {} proxies", count);
            Ok(Some(Arc::new(pool)))
        }
        None => {
            tracing::warn!("No proxy API key configured; sessions will run without proxies");
            Ok(None)
        }
    }
}
