use std::borrow::Cow;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::Fetcher;
use crate::indexer::{Indexer, SearchQuery};
use crate::release::ReleaseRecord;
use crate::torznab::{self, ChannelMetadata, MOVIE_CATEGORY, TV_CATEGORY, TorznabItem};
use crate::{AppState, SharedAppState};

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api", get(torznab_handler))
        .route("/download", get(download_handler))
        .route("/cache", delete(clear_cache_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct TorznabQuery {
    #[serde(rename = "t")]
    operation: Option<String>,
    cat: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    season: Option<String>,
    ep: Option<String>,
    #[serde(rename = "q")]
    query: Option<String>,
}

impl TorznabQuery {
    fn operation(&self) -> TorznabOperation<'_> {
        match self.operation.as_deref().unwrap_or("search") {
            "caps" => TorznabOperation::Caps,
            "search" => TorznabOperation::Search,
            "tvsearch" | "tv-search" => TorznabOperation::TvSearch,
            "movie" | "movie-search" => TorznabOperation::Movie,
            other => TorznabOperation::Unsupported(other),
        }
    }

    fn categories(&self) -> Vec<u32> {
        self.cat
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|part| part.trim().parse::<u32>().ok())
            .filter(|id| *id != 0)
            .collect()
    }

    fn season_number(&self) -> Option<u32> {
        parse_number(self.season.as_deref())
    }

    fn episode_number(&self) -> Option<u32> {
        parse_number(self.ep.as_deref())
    }

    fn search_query(&self, default_category: Option<u32>) -> SearchQuery {
        let mut categories = self.categories();
        if categories.is_empty()
            && let Some(default_category) = default_category
        {
            categories.push(default_category);
        }

        SearchQuery {
            term: self.query.clone().unwrap_or_default().trim().to_string(),
            categories,
            season: self.season_number(),
            episode: self.episode_number(),
        }
    }
}

fn parse_number(value: Option<&str>) -> Option<u32> {
    value.and_then(|value| value.trim().parse::<u32>().ok())
}

enum TorznabOperation<'a> {
    Caps,
    Search,
    TvSearch,
    Movie,
    Unsupported(&'a str),
}

async fn torznab_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<TorznabQuery>,
) -> Result<Response, HttpError> {
    let operation = query.operation();
    let operation_name = match &operation {
        TorznabOperation::Caps => "caps",
        TorznabOperation::Search => "search",
        TorznabOperation::TvSearch => "tvsearch",
        TorznabOperation::Movie => "movie",
        TorznabOperation::Unsupported(name) => name,
    };

    info!(
        operation = operation_name,
        q = query.query.as_deref(),
        cat = query.cat.as_deref(),
        season = query.season.as_deref(),
        ep = query.ep.as_deref(),
        limit = query.limit,
        "torznab request received"
    );

    match operation {
        TorznabOperation::Caps => respond_caps(&state),
        TorznabOperation::Search => respond_search(&state, &query, None).await,
        TorznabOperation::TvSearch => respond_search(&state, &query, Some(TV_CATEGORY.id)).await,
        TorznabOperation::Movie => respond_search(&state, &query, Some(MOVIE_CATEGORY.id)).await,
        TorznabOperation::Unsupported(name) => {
            Err(HttpError::UnsupportedOperation(name.to_string()))
        }
    }
}

fn respond_caps(state: &AppState) -> Result<Response, HttpError> {
    let metadata = build_channel_metadata(state)?;
    let xml = torznab::render_caps(&metadata)?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

async fn respond_search(
    state: &AppState,
    query: &TorznabQuery,
    default_category: Option<u32>,
) -> Result<Response, HttpError> {
    let metadata = build_channel_metadata(state)?;
    let base = public_base_url(state)?;
    let limit = query
        .limit
        .unwrap_or(state.config.default_limit)
        .max(1)
        .min(state.config.default_limit);
    let offset = query.offset.unwrap_or(0);

    let search = query.search_query(default_category);
    let releases = match tokio::time::timeout(
        state.config.query_timeout,
        state.indexer.perform_query(&search),
    )
    .await
    {
        Ok(releases) => releases,
        Err(_) => {
            warn!(term = %search.term, timeout = ?state.config.query_timeout, "catalog query timed out; returning empty feed");
            Vec::new()
        }
    };
    let total = releases.len();

    let items: Vec<TorznabItem> = releases
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|release| build_torznab_item(&base, release))
        .collect();

    debug!(total, offset, limit, returned = items.len(), "prepared torznab feed items");

    let xml = torznab::render_feed(&metadata, &items)?;
    Ok((
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct DownloadQuery {
    link: Option<String>,
}

async fn download_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, HttpError> {
    let raw = query.link.ok_or(HttpError::MissingLink)?;
    let details_uri = catalog_details_link(&state.indexer, &raw)?;

    debug!(details = %details_uri, "resolving torrent download");

    let payload = state
        .indexer
        .download(&details_uri)
        .await
        .ok_or_else(|| HttpError::TorrentNotFound(details_uri.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "application/x-bittorrent")],
        payload,
    )
        .into_response())
}

/// Only links on the configured catalog hosts are fetched on a caller's behalf.
fn catalog_details_link<F: Fetcher>(indexer: &Indexer<F>, raw: &str) -> Result<Url, HttpError> {
    let details_uri = Url::parse(raw.trim()).map_err(HttpError::InvalidLink)?;
    if !indexer.is_catalog_link(&details_uri) {
        return Err(HttpError::ForeignLink(details_uri.to_string()));
    }
    Ok(details_uri)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct CacheQuery {
    series: Option<String>,
}

/// Drops one cached series (`?series=`) or the whole cache.
async fn clear_cache_handler(
    State(state): State<SharedAppState>,
    Query(query): Query<CacheQuery>,
) -> impl IntoResponse {
    let cache = state.indexer.cache();
    let removed = match query.series.as_deref() {
        Some(series) => usize::from(cache.invalidate(series).await),
        None => cache.clear().await,
    };

    info!(series = query.series.as_deref(), removed, "series cache cleared");
    Json(json!({ "removed": removed }))
}

fn public_base_url(state: &AppState) -> Result<Url, HttpError> {
    match state.config.public_base_url.clone() {
        Some(url) => Ok(url),
        None => Url::parse(&format!("http://{}/", state.config.listen_addr))
            .map_err(|err| HttpError::BaseUrl(err.to_string())),
    }
}

fn build_channel_metadata(state: &AppState) -> Result<ChannelMetadata, HttpError> {
    let base = public_base_url(state)?;

    Ok(ChannelMetadata {
        title: state.config.application_title.clone(),
        description: state.config.application_description.clone(),
        site_link: base.to_string(),
        default_limit: state.config.default_limit,
    })
}

fn download_link(base: &Url, details_uri: &Url) -> String {
    let mut link = base.clone();
    link.set_path(&format!("{}download", base.path()));
    link.query_pairs_mut()
        .clear()
        .append_pair("link", details_uri.as_str());
    link.to_string()
}

fn build_torznab_item(base: &Url, release: ReleaseRecord) -> TorznabItem {
    let ReleaseRecord {
        title,
        size_bytes,
        publish_date,
        details_uri,
        category_ids,
        ..
    } = release;

    TorznabItem {
        title,
        guid: details_uri.to_string(),
        link: download_link(base, &details_uri),
        comments: details_uri.to_string(),
        published: publish_date,
        size_bytes,
        categories: category_ids,
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("unsupported torznab operation `{0}`")]
    UnsupportedOperation(String),
    #[error("failed to construct torznab metadata base url: {0}")]
    BaseUrl(String),
    #[error("download request is missing the `link` parameter")]
    MissingLink,
    #[error("download link is not a valid URL")]
    InvalidLink(#[source] url::ParseError),
    #[error("download link {0} is not on a catalog mirror")]
    ForeignLink(String),
    #[error("no mirror yielded a torrent for {0}")]
    TorrentNotFound(String),
    #[error(transparent)]
    Torznab(#[from] torznab::TorznabBuildError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, Cow<'static, str>) = match &self {
            HttpError::UnsupportedOperation(_)
            | HttpError::MissingLink
            | HttpError::InvalidLink(_)
            | HttpError::ForeignLink(_) => (StatusCode::BAD_REQUEST, Cow::from(self.to_string())),
            HttpError::BaseUrl(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Cow::from("Failed to construct public facing URL for newpctr indexer"),
            ),
            HttpError::TorrentNotFound(_) => (
                StatusCode::NOT_FOUND,
                Cow::from("Torrent not found on any catalog mirror"),
            ),
            HttpError::Torznab(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Cow::from("Failed to render torznab payload"),
            ),
        };

        tracing::error!("torznab handler error: {self}");

        (status, message).into_response()
    }
}
