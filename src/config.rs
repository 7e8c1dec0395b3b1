use std::{env, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tracing::warn;
use url::Url;

pub const DEFAULT_SITE_LINK: &str = "https://descargas2020.org/";

pub const KNOWN_MIRRORS: &[&str] = &[
    "http://www.tvsinpagar.com/",
    "http://torrentlocura.com/",
    "https://pctnew.site/",
    "https://descargas2020.site/",
    "http://torrentrapid.com/",
    "http://tumejortorrent.com/",
    "http://pctnew.com/",
];

const LEGACY_SITE_LINKS: &[&str] = &["https://pctnew.site/", "http://descargas2020.com/"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub public_base_url: Option<Url>,
    pub request_timeout: Duration,
    /// Upper bound for one whole search, across every page and mirror.
    pub query_timeout: Duration,
    pub application_title: String,
    pub application_description: String,
    pub default_limit: usize,
    pub indexer: IndexerConfig,
}

/// Everything the query core needs; the HTTP surface never reaches into this.
#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub site_link: Url,
    pub default_mirror: Url,
    pub mirrors: Vec<Url>,
    pub cache_ttl: Duration,
    pub toggles: QueryToggles,
}

/// Per-query switches, copied out once at the start of every query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryToggles {
    pub include_original_versions: bool,
    pub strict_movie_filter: bool,
    pub strip_movie_diacritics: bool,
}

impl Default for QueryToggles {
    fn default() -> Self {
        Self {
            include_original_versions: false,
            strict_movie_filter: true,
            strip_movie_diacritics: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("NEWPCTR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("NEWPCTR_PORT").unwrap_or_else(|_| "6768".to_string());
        let port = port
            .parse::<u16>()
            .context("NEWPCTR_PORT must be a valid u16 integer")?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .context("failed to parse socket address from NEWPCTR_HOST and NEWPCTR_PORT")?;

        let public_base_url = env::var("NEWPCTR_PUBLIC_BASE_URL")
            .ok()
            .map(|value| parse_root_url(&value, "NEWPCTR_PUBLIC_BASE_URL"))
            .transpose()?;

        let raw_site_link =
            env::var("NEWPCTR_SITE_LINK").unwrap_or_else(|_| DEFAULT_SITE_LINK.to_string());
        let site_link = migrate_legacy_link(parse_root_url(&raw_site_link, "NEWPCTR_SITE_LINK")?)?;

        let mirrors = match env::var("NEWPCTR_MIRRORS") {
            Ok(value) => value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| parse_root_url(entry, "NEWPCTR_MIRRORS"))
                .collect::<Result<Vec<_>>>()?,
            Err(_) => known_mirrors()?,
        };

        let timeout_secs = env::var("NEWPCTR_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(15);

        let query_timeout_secs = env::var("NEWPCTR_QUERY_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120);

        let cache_ttl_secs = env::var("NEWPCTR_CACHE_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(300);

        let defaults = QueryToggles::default();
        let toggles = QueryToggles {
            include_original_versions: env_flag(
                "NEWPCTR_INCLUDE_VO",
                defaults.include_original_versions,
            )?,
            strict_movie_filter: env_flag("NEWPCTR_FILTER_MOVIES", defaults.strict_movie_filter)?,
            strip_movie_diacritics: env_flag(
                "NEWPCTR_REMOVE_MOVIE_ACCENTS",
                defaults.strip_movie_diacritics,
            )?,
        };

        let application_title =
            env::var("NEWPCTR_TITLE").unwrap_or_else(|_| "Newpct".to_string());
        let application_description = env::var("NEWPCTR_DESCRIPTION")
            .unwrap_or_else(|_| "Newpct - descargar torrent peliculas, series".to_string());

        let default_limit = env::var("NEWPCTR_DEFAULT_LIMIT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(100);

        Ok(Self {
            listen_addr,
            public_base_url,
            request_timeout: Duration::from_secs(timeout_secs),
            query_timeout: Duration::from_secs(query_timeout_secs),
            application_title,
            application_description,
            default_limit,
            indexer: IndexerConfig {
                site_link,
                default_mirror: parse_root_url(DEFAULT_SITE_LINK, "default site link")?,
                mirrors,
                cache_ttl: Duration::from_secs(cache_ttl_secs),
                toggles,
            },
        })
    }
}

pub fn known_mirrors() -> Result<Vec<Url>> {
    KNOWN_MIRRORS
        .iter()
        .map(|raw| parse_root_url(raw, "known mirror"))
        .collect()
}

fn migrate_legacy_link(link: Url) -> Result<Url> {
    let is_legacy = LEGACY_SITE_LINKS
        .iter()
        .filter_map(|raw| Url::parse(raw).ok())
        .any(|legacy| legacy.scheme() == link.scheme() && legacy.host() == link.host());

    if !is_legacy {
        return Ok(link);
    }

    warn!(
        site_link = %link,
        replacement = DEFAULT_SITE_LINK,
        "configured site link points at a retired mirror; using the default instead"
    );
    parse_root_url(DEFAULT_SITE_LINK, "default site link")
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => parse_flag(&value).with_context(|| format!("{name} must be a boolean")),
        Err(_) => Ok(default),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognised flag value `{other}`"),
    }
}

fn parse_root_url(value: &str, label: &str) -> Result<Url> {
    let mut normalized = value.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).with_context(|| format!("{label} must be a valid URL"))
}
