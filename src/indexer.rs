//! Query orchestration: feed polling, TV and movie keyword searches, and
//! torrent download resolution across mirrors.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{FeedCursor, QueryCache};
use crate::config::{IndexerConfig, QueryToggles};
use crate::fetch::{FetchResponse, Fetcher, FormPayload, download_following, fetch_following};
use crate::mirrors::{MirrorSet, origin_of, resolve_mirror};
use crate::parser::{self, FeedContext, PageItems, ParseFailureReporter};
use crate::release::ReleaseRecord;
use crate::score;
use crate::title;
use crate::torznab::{MOVIE_CATEGORY, TV_CATEGORY};

const MAX_FEED_PAGES: u32 = 7;
const MAX_MOVIE_PAGES: u32 = 30;
const MAX_EPISODE_PAGES: u32 = 100;

const SERIES_LETTER_PATHS: &[&str] = &["/series/letter/", "/series-hd/letter/"];
const ORIGINAL_VERSION_LETTER_PATHS: &[&str] = &["/series-vo/letter/"];

static DESCARGAR_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^"]*/descargar-torrent/[^"]*)"#).expect("download link pattern")
});

static NALT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"nalt\s*=\s*'([^/']*)").expect("download id pattern"));

/// A search as received from the Torznab surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub categories: Vec<u32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl SearchQuery {
    pub fn feed() -> Self {
        Self::default()
    }

    fn is_feed(&self) -> bool {
        self.term.trim().is_empty()
    }

    fn wants_tv(&self) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|id| TV_CATEGORY.contains(*id))
    }

    fn wants_movies(&self) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|id| MOVIE_CATEGORY.contains(*id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchFormat {
    Json,
    Markup,
}

impl SearchFormat {
    fn path(self) -> &'static str {
        match self {
            SearchFormat::Json => "/get/result/",
            SearchFormat::Markup => "/buscar",
        }
    }

    fn parse(
        self,
        response: &FetchResponse,
        fetched_at: OffsetDateTime,
        reporter: Option<&dyn ParseFailureReporter>,
    ) -> PageItems<ReleaseRecord> {
        match self {
            SearchFormat::Json => {
                parser::parse_search_json(&response.body, &response.url, fetched_at, reporter)
            }
            SearchFormat::Markup => {
                parser::parse_search_markup(&response.body, &response.url, fetched_at, reporter)
            }
        }
    }
}

pub struct Indexer<F> {
    fetcher: F,
    reporter: Arc<dyn ParseFailureReporter>,
    config: IndexerConfig,
    cache: QueryCache,
    cursor: Mutex<Option<FeedCursor>>,
}

impl<F: Fetcher> Indexer<F> {
    pub fn new(fetcher: F, reporter: Arc<dyn ParseFailureReporter>, config: IndexerConfig) -> Self {
        let cache = QueryCache::new(config.cache_ttl);
        Self {
            fetcher,
            reporter,
            config,
            cache,
            cursor: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn perform_query(&self, query: &SearchQuery) -> Vec<ReleaseRecord> {
        self.cache.expire().await;
        let toggles = self.config.toggles;

        if query.is_feed() {
            let releases = self.poll_feed(toggles).await;
            info!(results = releases.len(), "feed poll finished");
            return releases;
        }

        let mut releases = Vec::new();
        if query.wants_tv() {
            releases.extend(self.search_tv(query, toggles).await);
        }
        if query.wants_movies() {
            releases.extend(self.search_movies(query, toggles).await);
        }

        info!(term = %query.term, results = releases.len(), "keyword search finished");
        releases
    }

    async fn poll_feed(&self, toggles: QueryToggles) -> Vec<ReleaseRecord> {
        let previous = self.cursor.lock().await.clone();
        let reporter = self.reporter.as_ref();
        let mut context = FeedContext {
            include_original_versions: toggles.include_original_versions,
            fetched_at: OffsetDateTime::now_utc(),
            row_index: 0,
        };

        let mut pinned: Option<Url> = None;
        let mut releases = Vec::new();

        for page in 1..=MAX_FEED_PAGES {
            let path = format!("/ultimas-descargas/pg/{page}");

            let items = match &pinned {
                Some(origin) => match self.fetch_page(&with_path(origin, &path), None).await {
                    Some(response) => {
                        parser::parse_feed(&response.body, &response.url, &mut context, reporter)
                            .into_items()
                    }
                    None => Vec::new(),
                },
                None => {
                    let reference = with_path(&self.config.site_link, &path);
                    let found = resolve_mirror(
                        &self.fetcher,
                        self.mirror_set(&reference).untagged(),
                        None,
                        |_, (), response| {
                            match parser::parse_feed(&response.body, &response.url, &mut context, reporter) {
                                PageItems::Found(items) => Some(items),
                                PageItems::Empty | PageItems::Absent => None,
                            }
                        },
                    )
                    .await;

                    match found {
                        Some(found) => {
                            pinned = Some(origin_of(&found.mirror));
                            found.value
                        }
                        None => Vec::new(),
                    }
                }
            };

            if items.is_empty() {
                debug!(page, "feed page yielded nothing; stopping");
                break;
            }

            if page == 1 {
                *self.cursor.lock().await = items.first().map(FeedCursor::from_record);
            }

            let seen_at = previous
                .as_ref()
                .and_then(|cursor| items.iter().position(|item| cursor.matches(item)));

            match seen_at {
                Some(index) => {
                    debug!(page, index, "reached previously seen feed item");
                    releases.extend(items.into_iter().take(index));
                    break;
                }
                None => releases.extend(items),
            }
        }

        releases
    }

    async fn search_tv(&self, query: &SearchQuery, toggles: QueryToggles) -> Vec<ReleaseRecord> {
        let term = query.term.trim();
        let mut series_name = term.to_string();
        let mut season = query.season;
        let mut episode = query.episode;

        if season.is_none()
            && episode.is_none()
            && let Some(shorthand) = title::parse_search_shorthand(term)
        {
            series_name = shorthand.series_name;
            season = Some(shorthand.season);
            episode = shorthand.episode;
        }

        if series_name.is_empty() {
            return Vec::new();
        }

        let records = {
            let mut cached = self.cache.slot(&series_name).await;
            match cached.get() {
                Some(records) => {
                    debug!(series = %series_name, cached = records.len(), "serving series from cache");
                    records
                }
                None => {
                    let mut records = self.fetch_series(&series_name, toggles).await;
                    // Listings often keep the article that search clients strip.
                    if records.is_empty() && !series_name.to_lowercase().starts_with("the") {
                        records = self
                            .fetch_series(&format!("The {series_name}"), toggles)
                            .await;
                    }
                    cached.insert(records.clone());
                    records
                }
            }
        };

        records
            .into_iter()
            .filter(|record| record.covers(season, episode))
            .collect()
    }

    async fn fetch_series(&self, series_name: &str, toggles: QueryToggles) -> Vec<ReleaseRecord> {
        let reporter = self.reporter.as_ref();
        let letter = series_letter(series_name);

        let mut letter_paths: Vec<&str> = SERIES_LETTER_PATHS.to_vec();
        if toggles.include_original_versions {
            letter_paths.extend_from_slice(ORIGINAL_VERSION_LETTER_PATHS);
        }

        let mut pinned: Option<Url> = None;
        let mut releases = Vec::new();

        for prefix in letter_paths {
            let path = format!("{prefix}{letter}");

            let listing = match &pinned {
                Some(origin) => self
                    .fetch_page(&with_path(origin, &path), None)
                    .await
                    .and_then(|response| {
                        parser::parse_series_directory(&response.body, &response.url, series_name, reporter)
                    }),
                None => {
                    let reference = with_path(&self.config.site_link, &path);
                    let found = resolve_mirror(
                        &self.fetcher,
                        self.mirror_set(&reference).untagged(),
                        None,
                        |_, (), response| {
                            Some(parser::parse_series_directory(
                                &response.body,
                                &response.url,
                                series_name,
                                reporter,
                            ))
                        },
                    )
                    .await;

                    found.and_then(|found| {
                        pinned = Some(origin_of(&found.mirror));
                        found.value
                    })
                }
            };

            let (Some(series_url), Some(origin)) = (listing, pinned.as_ref()) else {
                continue;
            };

            let episodes_url = with_path(origin, series_url.path());
            debug!(series = series_name, url = %episodes_url, "walking episode list");
            releases.extend(self.walk_episodes(&episodes_url).await);
        }

        releases
    }

    async fn walk_episodes(&self, series_url: &Url) -> Vec<ReleaseRecord> {
        let base = series_url.path().trim_end_matches('/').to_string();
        let mut releases = Vec::new();

        for page in 1..MAX_EPISODE_PAGES {
            let page_url = with_path(series_url, &format!("{base}/pg/{page}"));
            let Some(response) = self.fetch_page(&page_url, None).await else {
                break;
            };

            match parser::parse_episode_list(&response.body, &response.url, self.reporter.as_ref()) {
                PageItems::Found(items) => releases.extend(items),
                PageItems::Empty | PageItems::Absent => break,
            }
        }

        releases
    }

    async fn search_movies(&self, query: &SearchQuery, toggles: QueryToggles) -> Vec<ReleaseRecord> {
        let mut term = query.term.trim().to_string();
        if toggles.strip_movie_diacritics {
            term = score::strip_diacritics(&term);
        }

        let mut pinned: Option<(Url, SearchFormat)> = None;
        let mut releases = Vec::new();

        for page in 1..=MAX_MOVIE_PAGES {
            let form = [
                ("q", term.clone()),
                ("s", term.clone()),
                ("pg", page.to_string()),
            ];
            let fetched_at = OffsetDateTime::now_utc();

            let items = match &pinned {
                Some((origin, format)) => {
                    match self
                        .fetch_page(&with_path(origin, format.path()), Some(form.as_slice()))
                        .await
                    {
                        Some(response) => {
                            format.parse(&response, fetched_at, Some(self.reporter.as_ref()))
                        }
                        None => PageItems::Absent,
                    }
                }
                None => {
                    let found = resolve_mirror(
                        &self.fetcher,
                        self.search_candidates(),
                        Some(form.as_slice()),
                        |_, format: SearchFormat, response| {
                            // Probing a mirror for its format; a mismatch is expected here.
                            let items = format.parse(response, fetched_at, None);
                            (!items.is_absent()).then_some(items)
                        },
                    )
                    .await;

                    match found {
                        Some(found) => {
                            debug!(mirror = %found.mirror, format = ?found.kind, "pinned movie search endpoint");
                            pinned = Some((origin_of(&found.mirror), found.kind));
                            found.value
                        }
                        None => PageItems::Absent,
                    }
                }
            };

            if items.is_absent() {
                debug!(page, "movie search page absent; stopping");
                break;
            }
            releases.extend(items.into_items());
        }

        score::rank_and_filter(&mut releases, &term, toggles.strict_movie_filter);
        releases
    }

    /// Every mirror's JSON endpoint followed by its markup endpoint.
    fn search_candidates(&self) -> Vec<(Url, SearchFormat)> {
        self.mirror_set(&self.config.site_link)
            .into_iter()
            .flat_map(|mirror| {
                [SearchFormat::Json, SearchFormat::Markup]
                    .map(|format| (with_path(&mirror, format.path()), format))
            })
            .collect()
    }

    /// Whether `url` lives on the configured site or one of its mirrors.
    pub fn is_catalog_link(&self, url: &Url) -> bool {
        let origin = url.origin();
        std::iter::once(&self.config.site_link)
            .chain(std::iter::once(&self.config.default_mirror))
            .chain(self.config.mirrors.iter())
            .any(|known| known.origin() == origin)
    }

    /// Fetches the details page on each mirror until one yields a torrent.
    pub async fn download(&self, details_uri: &Url) -> Option<Vec<u8>> {
        for candidate in self.mirror_set(details_uri) {
            let response = match fetch_following(&self.fetcher, &candidate, None).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(mirror = %candidate, error = %error, "details page request failed");
                    continue;
                }
            };

            let Some(link) = extract_download_link(&response.body, &response.url) else {
                warn!(mirror = %candidate, "download link not found on details page");
                continue;
            };

            match download_following(&self.fetcher, &link).await {
                Ok(payload) => {
                    info!(link = %link, bytes = payload.len(), "torrent downloaded");
                    return Some(payload);
                }
                Err(error) => warn!(link = %link, error = %error, "torrent download failed"),
            }
        }

        None
    }

    fn mirror_set(&self, reference: &Url) -> MirrorSet {
        MirrorSet::for_link(reference, &self.config.default_mirror, &self.config.mirrors)
    }

    async fn fetch_page(&self, url: &Url, form: Option<&FormPayload>) -> Option<FetchResponse> {
        match fetch_following(&self.fetcher, url, form).await {
            Ok(response) if !response.body.trim().is_empty() => Some(response),
            Ok(_) => {
                debug!(url = %url, "pinned mirror returned an empty body");
                None
            }
            Err(error) => {
                warn!(url = %url, error = %error, "pinned mirror request failed");
                None
            }
        }
    }
}

/// Scans a details page for the torrent link.
pub fn extract_download_link(body: &str, page_url: &Url) -> Option<Url> {
    if let Some(captures) = DESCARGAR_LINK_RE.captures(body)
        && let Ok(link) = page_url.join(&captures[1])
    {
        return Some(link);
    }

    let captures = NALT_ID_RE.captures(body)?;
    page_url
        .join(&format!("/download/{}.torrent", &captures[1]))
        .ok()
}

fn series_letter(series_name: &str) -> String {
    match series_name.chars().next() {
        Some(c) if c.is_ascii_digit() => "0-9".to_string(),
        Some(c) => c.to_lowercase().collect(),
        None => String::new(),
    }
}

fn with_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::fetch::{DownloadResponse, FetchError};
    use crate::parser::TracingReporter;

    /// Holds `/series` requests until released, announcing each arrival.
    struct Gate {
        arrived: Notify,
        open: Semaphore,
    }

    #[derive(Default)]
    struct MockFetcher {
        pages: StdMutex<HashMap<String, (u16, String)>>,
        torrents: StdMutex<HashMap<String, (u16, Vec<u8>, Option<String>)>>,
        requests: StdMutex<Vec<String>>,
        series_gate: Option<Arc<Gate>>,
    }

    impl MockFetcher {
        fn page(&self, key: &str, status: u16, body: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(key.to_string(), (status, body.to_string()));
        }

        fn torrent(&self, url: &str, payload: &[u8]) {
            self.torrents
                .lock()
                .unwrap()
                .insert(url.to_string(), (200, payload.to_vec(), None));
        }

        fn torrent_redirect(&self, url: &str, target: &str) {
            self.torrents
                .lock()
                .unwrap()
                .insert(url.to_string(), (302, Vec::new(), Some(target.to_string())));
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn request_key(url: &Url, form: Option<&FormPayload>) -> String {
        let page = form.and_then(|form| form.iter().find(|(name, _)| *name == "pg"));
        match page {
            Some((_, page)) => format!("{url}#pg={page}"),
            None => url.to_string(),
        }
    }

    impl Fetcher for MockFetcher {
        async fn fetch(
            &self,
            url: &Url,
            form: Option<&FormPayload>,
        ) -> Result<FetchResponse, FetchError> {
            let key = request_key(url, form);
            self.requests.lock().unwrap().push(key.clone());
            if let Some(gate) = &self.series_gate
                && url.path().starts_with("/series")
            {
                gate.arrived.notify_one();
                let _pass = gate.open.acquire().await;
            }
            let (status, body) = self
                .pages
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or((404, String::new()));

            Ok(FetchResponse {
                url: url.clone(),
                status,
                body,
                redirect: None,
            })
        }

        async fn download(&self, url: &Url) -> Result<DownloadResponse, FetchError> {
            let (status, bytes, redirect) = self
                .torrents
                .lock()
                .unwrap()
                .get(url.as_str())
                .cloned()
                .unwrap_or((404, Vec::new(), None));

            Ok(DownloadResponse {
                url: url.clone(),
                status,
                bytes,
                redirect: redirect.map(|target| url.join(&target).unwrap()),
            })
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            site_link: Url::parse("https://a.test/").unwrap(),
            default_mirror: Url::parse("https://b.test/").unwrap(),
            mirrors: Vec::new(),
            cache_ttl: Duration::from_secs(300),
            toggles: QueryToggles::default(),
        }
    }

    fn indexer(fetcher: MockFetcher, config: IndexerConfig) -> Indexer<MockFetcher> {
        Indexer::new(fetcher, Arc::new(TracingReporter), config)
    }

    fn feed_page(episodes: &[u32]) -> String {
        let rows: String = episodes
            .iter()
            .map(|episode| {
                format!(
                    r#"<div class="info"><a href="/serie/lost/capitulo-1{episode:02}/" title="Lost - Temporada 1 Capitulo {episode}">Lost</a><span>HDTV<strong>Tamaño 350 MB</strong></span><div><b>Idioma:</b>Español</div></div>"#
                )
            })
            .collect();
        format!(r#"<div class="content">{rows}</div>"#)
    }

    fn episodes(records: &[ReleaseRecord]) -> Vec<u32> {
        records.iter().filter_map(|record| record.episode).collect()
    }

    #[tokio::test]
    async fn test_feed_poll_stops_at_previous_cursor() {
        let fetcher = MockFetcher::default();
        fetcher.page("https://a.test/ultimas-descargas/pg/1", 200, &feed_page(&[1, 2, 3]));
        let indexer = indexer(fetcher, config());

        let first = indexer.perform_query(&SearchQuery::feed()).await;
        assert_eq!(episodes(&first), vec![1, 2, 3]);

        indexer
            .fetcher
            .page("https://a.test/ultimas-descargas/pg/1", 200, &feed_page(&[4, 1, 2]));
        let before = indexer.fetcher.requests().len();

        let second = indexer.perform_query(&SearchQuery::feed()).await;

        assert_eq!(episodes(&second), vec![4]);
        assert_eq!(
            indexer.fetcher.requests()[before..],
            ["https://a.test/ultimas-descargas/pg/1".to_string()]
        );
        let cursor = indexer.cursor.lock().await.clone().unwrap();
        assert!(cursor.matches(&second[0]));
    }

    #[tokio::test]
    async fn test_feed_falls_back_to_next_mirror_and_pins_it() {
        let fetcher = MockFetcher::default();
        fetcher.page("https://a.test/ultimas-descargas/pg/1", 503, "down");
        fetcher.page("https://b.test/ultimas-descargas/pg/1", 200, &feed_page(&[1, 2]));
        fetcher.page("https://b.test/ultimas-descargas/pg/2", 200, &feed_page(&[3]));
        let indexer = indexer(fetcher, config());

        let releases = indexer.perform_query(&SearchQuery::feed()).await;

        assert_eq!(episodes(&releases), vec![1, 2, 3]);
        assert!(
            releases
                .iter()
                .all(|record| record.details_uri.host_str() == Some("b.test"))
        );
        let requests = indexer.fetcher.requests();
        assert!(requests.contains(&"https://b.test/ultimas-descargas/pg/3".to_string()));
        assert!(!requests.iter().any(|request| request.starts_with("https://a.test/ultimas-descargas/pg/2")));
    }

    fn directory(entries: &[(&str, &str)]) -> String {
        let items: String = entries
            .iter()
            .map(|(href, name)| format!(r#"<li><a href="{href}"><h2>{name}</h2></a></li>"#))
            .collect();
        format!(r#"<ul class="pelilist">{items}</ul>"#)
    }

    fn episode_page(titles: &[&str]) -> String {
        let rows: String = titles
            .iter()
            .map(|title| {
                format!(
                    "<div class=\"info\">\n<a href=\"/serie/x/\">{title}</a>\n<span>12-03-2019</span>\n<span>1 GB</span>\n</div>"
                )
            })
            .collect();
        format!("<div class=\"content\">{rows}</div>")
    }

    fn tv_query(term: &str, season: Option<u32>, episode: Option<u32>) -> SearchQuery {
        SearchQuery {
            term: term.to_string(),
            categories: vec![TV_CATEGORY.id],
            season,
            episode,
        }
    }

    #[tokio::test]
    async fn test_tv_search_filters_ranges_and_caches_series() {
        let fetcher = MockFetcher::default();
        fetcher.page(
            "https://a.test/series/letter/l",
            200,
            &directory(&[("/series/lost-girl/", "Lost Girl"), ("/series/lost/", "Lost")]),
        );
        fetcher.page("https://a.test/series-hd/letter/l", 200, &directory(&[]));
        fetcher.page(
            "https://a.test/series/lost/pg/1",
            200,
            &episode_page(&[
                "Lost - Temporada 1 [HDTV][Cap.105_108][Español]",
                "Lost - Temporada 1 [HDTV][Cap.109][Español]",
            ]),
        );
        let indexer = indexer(fetcher, config());

        let seventh = indexer.perform_query(&tv_query("Lost", Some(1), Some(7))).await;
        assert_eq!(seventh.len(), 1);
        assert_eq!(seventh[0].episode_range_end, Some(8));

        let fetched = indexer.fetcher.requests().len();
        let ninth = indexer.perform_query(&tv_query("lost ", None, None)).await;

        assert_eq!(ninth.len(), 2);
        assert_eq!(indexer.fetcher.requests().len(), fetched);
        assert!(indexer.cache().slot("LOST").await.get().is_some());
    }

    #[tokio::test]
    async fn test_tv_search_parses_shorthand_and_retries_with_article() {
        let fetcher = MockFetcher::default();
        fetcher.page("https://a.test/series/letter/w", 200, &directory(&[]));
        fetcher.page("https://a.test/series-hd/letter/w", 200, &directory(&[]));
        fetcher.page(
            "https://a.test/series/letter/t",
            200,
            &directory(&[("/series/the-wire/", "The Wire")]),
        );
        fetcher.page("https://a.test/series-hd/letter/t", 200, &directory(&[]));
        fetcher.page(
            "https://a.test/series/the-wire/pg/1",
            200,
            &episode_page(&[
                "The Wire - Temporada 3 [HDTV][Cap.301][Español]",
                "The Wire - Temporada 3 [HDTV][Cap.302][Español]",
            ]),
        );
        let indexer = indexer(fetcher, config());

        let releases = indexer.perform_query(&tv_query("Wire S03E02", None, None)).await;

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].series_name, "The Wire");
        assert_eq!(releases[0].episode, Some(2));
        assert!(indexer.cache().slot("wire").await.get().is_some());
    }

    fn movie_query(term: &str) -> SearchQuery {
        SearchQuery {
            term: term.to_string(),
            categories: vec![MOVIE_CATEGORY.id],
            season: None,
            episode: None,
        }
    }

    const MOVIE_JSON: &str = r#"{"data":{"items":2,"torrents":{"0":{
        "0":{"guid":"/pelicula/blade-2/","torrentName":"Blade 2","torrentDateAdded":"01/02/2020","calidad":"BluRay","torrentSize":"1 GB"},
        "1":{"guid":"/pelicula/blade-runner-2049/","torrentName":"Blade Runner 2049","torrentDateAdded":"01/02/2020","calidad":"BluRay","torrentSize":"2 GB"}
    }}}}"#;

    fn movie_fetcher() -> MockFetcher {
        let fetcher = MockFetcher::default();
        fetcher.page("https://a.test/get/result/#pg=1", 200, MOVIE_JSON);
        fetcher.page(
            "https://a.test/get/result/#pg=2",
            200,
            r#"{"data":{"items":0,"torrents":{}}}"#,
        );
        fetcher
    }

    #[tokio::test]
    async fn test_movie_search_strict_filter() {
        let indexer = indexer(movie_fetcher(), config());

        let releases = indexer.perform_query(&movie_query("Blade Runner")).await;

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].series_name, "Blade Runner 2049");
        assert_eq!(releases[0].score, 1);
    }

    #[tokio::test]
    async fn test_movie_search_lenient_ranking() {
        let mut config = config();
        config.toggles.strict_movie_filter = false;
        let indexer = indexer(movie_fetcher(), config);

        let releases = indexer.perform_query(&movie_query("Blade Runner")).await;

        let names: Vec<&str> = releases.iter().map(|r| r.series_name.as_str()).collect();
        assert_eq!(names, vec!["Blade Runner 2049", "Blade 2"]);
        assert!(releases[1].score >= score::SENTINEL);
    }

    #[tokio::test]
    async fn test_movie_search_pins_markup_endpoint() {
        let fetcher = MockFetcher::default();
        fetcher.page(
            "https://a.test/buscar#pg=1",
            200,
            concat!(
                r#"<div class="content"><div class="info"><a href="/pelicula/arbol/"><h2>El Arbol de la Vida</h2></a>"#,
                r#"<span>x</span><span>01-02-2020</span><span>1 GB</span></div></div>"#
            ),
        );
        fetcher.page("https://a.test/buscar#pg=2", 200, "<html></html>");
        let indexer = indexer(fetcher, config());

        let releases = indexer.perform_query(&movie_query("El Árbol")).await;

        assert_eq!(releases.len(), 1);
        let requests = indexer.fetcher.requests();
        assert!(requests.contains(&"https://a.test/buscar#pg=1".to_string()));
        assert!(requests.contains(&"https://a.test/buscar#pg=2".to_string()));
        assert_eq!(
            requests
                .iter()
                .filter(|request| request.contains("/get/result/"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_download_tries_mirrors_in_order() {
        let fetcher = MockFetcher::default();
        fetcher.page("https://a.test/pelicula/matrix/", 503, "down");
        fetcher.page(
            "https://b.test/pelicula/matrix/",
            200,
            r#"<a href="/descargar-torrent/1234_matrix/">Descargar</a>"#,
        );
        fetcher.torrent("https://b.test/descargar-torrent/1234_matrix/", b"d8:announce");
        let indexer = indexer(fetcher, config());

        let details = Url::parse("https://a.test/pelicula/matrix/").unwrap();
        let payload = indexer.download(&details).await;

        assert_eq!(payload.as_deref(), Some(&b"d8:announce"[..]));

        let missing = Url::parse("https://a.test/pelicula/none/").unwrap();
        assert!(indexer.download(&missing).await.is_none());
    }

    #[tokio::test]
    async fn test_download_follows_redirect_and_skips_empty_torrents() {
        let fetcher = MockFetcher::default();
        let details_page = r#"<a href="/descargar-torrent/1234_matrix/">Descargar</a>"#;
        fetcher.page("https://a.test/pelicula/matrix/", 200, details_page);
        fetcher.page("https://b.test/pelicula/matrix/", 200, details_page);
        fetcher.torrent("https://a.test/descargar-torrent/1234_matrix/", b"");
        fetcher.torrent_redirect("https://b.test/descargar-torrent/1234_matrix/", "/real.torrent");
        fetcher.torrent("https://b.test/real.torrent", b"d8:announce");
        let indexer = indexer(fetcher, config());

        let details = Url::parse("https://a.test/pelicula/matrix/").unwrap();
        let payload = indexer.download(&details).await;

        assert_eq!(payload.as_deref(), Some(&b"d8:announce"[..]));
    }

    #[test]
    fn test_catalog_link_accepts_known_hosts_only() {
        let mut config = config();
        config.mirrors = vec![Url::parse("http://c.test/").unwrap()];
        let indexer = indexer(MockFetcher::default(), config);

        for known in [
            "https://a.test/pelicula/matrix/",
            "https://b.test/x",
            "http://c.test/serie/lost/",
        ] {
            assert!(indexer.is_catalog_link(&Url::parse(known).unwrap()), "{known}");
        }
        for foreign in [
            "http://a.test/pelicula/matrix/",
            "https://a.test:8443/x",
            "http://169.254.169.254/latest/meta-data/",
            "file:///etc/passwd",
        ] {
            assert!(!indexer.is_catalog_link(&Url::parse(foreign).unwrap()), "{foreign}");
        }
    }

    #[tokio::test]
    async fn test_slow_series_walk_does_not_block_feed_or_cache() {
        let gate = Arc::new(Gate {
            arrived: Notify::new(),
            open: Semaphore::new(0),
        });
        let fetcher = MockFetcher {
            series_gate: Some(gate.clone()),
            ..MockFetcher::default()
        };
        fetcher.page("https://a.test/ultimas-descargas/pg/1", 200, &feed_page(&[1]));
        fetcher.page(
            "https://a.test/series/letter/l",
            200,
            &directory(&[("/series/lost/", "Lost")]),
        );
        fetcher.page("https://a.test/series-hd/letter/l", 200, &directory(&[]));
        fetcher.page(
            "https://a.test/series/lost/pg/1",
            200,
            &episode_page(&["Lost - Temporada 1 [HDTV][Cap.101][Español]"]),
        );
        let indexer = Arc::new(indexer(fetcher, config()));

        let tv = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.perform_query(&tv_query("Lost", None, None)).await }
        });
        gate.arrived.notified().await;

        let feed = tokio::time::timeout(Duration::from_secs(2), async {
            let feed = indexer.perform_query(&SearchQuery::feed()).await;
            indexer.cache().clear().await;
            feed
        })
        .await
        .expect("feed poll waited for the series walk");
        assert_eq!(episodes(&feed), vec![1]);

        gate.open.add_permits(1);
        let tv = tv.await.unwrap();
        assert_eq!(episodes(&tv), vec![1]);
    }

    #[test]
    fn test_extract_download_link_from_script_id() {
        let page = Url::parse("https://b.test/pelicula/matrix/").unwrap();
        let link = extract_download_link("var nalt = '98765';", &page).unwrap();
        assert_eq!(link.as_str(), "https://b.test/download/98765.torrent");
        assert!(extract_download_link("<html></html>", &page).is_none());
    }

    #[test]
    fn test_series_letter() {
        assert_eq!(series_letter("Lost"), "l");
        assert_eq!(series_letter("24"), "0-9");
    }
}
