mod cache;
mod config;
mod fetch;
mod http;
mod indexer;
mod mirrors;
mod parser;
mod release;
mod score;
mod title;
mod torznab;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::fetch::HttpFetcher;
use crate::indexer::{Indexer, SearchQuery};
use crate::parser::TracingReporter;

pub struct AppState {
    pub config: AppConfig,
    pub indexer: Indexer<HttpFetcher>,
}

pub type SharedAppState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let listen_addr = config.listen_addr;

    let fetcher =
        HttpFetcher::new(config.request_timeout).context("failed to construct catalog client")?;
    let indexer = Indexer::new(fetcher, Arc::new(TracingReporter), config.indexer.clone());

    tracing::info!(
        site_link = %config.indexer.site_link,
        mirrors = config.indexer.mirrors.len(),
        include_vo = config.indexer.toggles.include_original_versions,
        "catalog indexer configured"
    );

    let state = Arc::new(AppState { config, indexer });
    tokio::spawn(probe_feed(state.clone()));

    let app = http::router(state.clone());

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {listen_addr}"))?;

    tracing::info!(
        "listening for torznab requests on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app.into_make_service())
        .await
        .context("server terminated unexpectedly")?;

    Ok(())
}

/// Polls the feed once so a dead mirror list shows up in the logs at boot.
async fn probe_feed(state: SharedAppState) {
    let releases = state.indexer.perform_query(&SearchQuery::feed()).await;
    if releases.is_empty() {
        tracing::warn!("startup feed probe found no releases on any mirror");
    } else {
        tracing::info!(releases = releases.len(), "startup feed probe succeeded");
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().without_time())
        .init();
}
