//! Catalog page parsers.
//!
//! Every parser works on a fully fetched body and hands back
//! [`ReleaseRecord`]s already run through title extraction. Markup is parsed
//! with `scraper`, whose documents are not `Send`, so nothing here is async.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};
use tracing::{debug, warn};
use url::Url;

use crate::mirrors::origin_of;
use crate::release::{self, RawItem, ReleaseRecord, ReleaseType};

static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".content .info").expect("row selector"));
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("anchor selector"));
static SPAN_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span").expect("span selector"));
static DIV_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div").expect("div selector"));
static HEADING_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2").expect("heading selector"));
static DIRECTORY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".pelilist li a").expect("directory selector"));

/// Path fragments that mark original-version (undubbed) listings.
const ORIGINAL_VERSION_MARKERS: &[&str] = &["serie-vo", "serievo"];

/// Outcome of parsing one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageItems<T> {
    /// The page listed usable items.
    Found(Vec<T>),
    /// The page had listings, but every one was filtered out.
    Empty,
    /// The page had no listings at all, or could not be read.
    Absent,
}

impl<T> PageItems<T> {
    fn from_items(items: Vec<T>) -> Self {
        if items.is_empty() {
            PageItems::Empty
        } else {
            PageItems::Found(items)
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, PageItems::Absent)
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            PageItems::Found(items) => items,
            PageItems::Empty | PageItems::Absent => Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("listing row has no `{0}` element")]
    MissingElement(&'static str),
    #[error("listing row has no child node {0}")]
    MissingNode(usize),
    #[error("invalid details link `{href}`")]
    InvalidLink {
        href: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid publish date `{0}`")]
    InvalidDate(String),
    #[error("malformed search response")]
    Json(#[from] serde_json::Error),
    #[error("search response is missing `{0}`")]
    MissingField(&'static str),
}

/// Receives pages the parsers could not make sense of.
pub trait ParseFailureReporter: Send + Sync {
    fn report_parse_failure(&self, raw: &str, error: &ParseError);
}

/// Logs parse failures with a prefix of the offending page.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ParseFailureReporter for TracingReporter {
    fn report_parse_failure(&self, raw: &str, error: &ParseError) {
        let excerpt: String = raw.chars().take(512).collect();
        warn!(error = %error, bytes = raw.len(), excerpt = %excerpt, "failed to parse catalog page");
    }
}

/// Context shared by every row of one feed poll.
#[derive(Debug)]
pub struct FeedContext {
    pub include_original_versions: bool,
    pub fetched_at: OffsetDateTime,
    /// Running row counter across pages; each row is stamped one
    /// millisecond earlier than the previous one to keep feed order.
    pub row_index: i64,
}

/// Parses a `/ultimas-descargas` page.
pub fn parse_feed(
    body: &str,
    page_url: &Url,
    context: &mut FeedContext,
    reporter: &dyn ParseFailureReporter,
) -> PageItems<ReleaseRecord> {
    let document = Html::parse_document(body);
    let mut items = Vec::new();
    let mut rows_seen = false;

    for row in document.select(&ROW_SELECTOR) {
        rows_seen = true;
        match feed_row(row, page_url, context) {
            Ok(Some(item)) => items.push(release::assemble(item)),
            Ok(None) => {}
            Err(error) => {
                reporter.report_parse_failure(body, &error);
                return PageItems::Absent;
            }
        }
    }

    if !rows_seen {
        return PageItems::Absent;
    }
    PageItems::from_items(items)
}

fn feed_row(
    row: ElementRef<'_>,
    page_url: &Url,
    context: &mut FeedContext,
) -> Result<Option<RawItem>, ParseError> {
    let anchor = first(row, &ANCHOR_SELECTOR, "a")?;

    let visible = collapse_whitespace(&anchor.text().collect::<String>());
    let attribute = collapse_whitespace(anchor.value().attr("title").unwrap_or_default());
    let title = if attribute.len() >= visible.len() {
        attribute
    } else {
        visible
    };

    let href = anchor.value().attr("href").unwrap_or_default();
    if !context.include_original_versions {
        let lowered = href.to_lowercase();
        if ORIGINAL_VERSION_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            debug!(href, "skipping original-version listing");
            return Ok(None);
        }
    }
    let details_uri = resolve_link(page_url, href)?;

    let span = first(row, &SPAN_SELECTOR, "span")?;
    let quality = child_text(span, 0)?.trim().to_string();
    let size_text = child_text(span, 1)?.replace("Tamaño", "");

    let div = first(row, &DIV_SELECTOR, "div")?;
    let language = child_text(div, 1)?.trim().to_string();

    let release_type = ReleaseType::from_quality(&quality);
    let composed = match release_type {
        ReleaseType::Tv => format!("Serie {title} - {language} Calidad [{quality}]"),
        ReleaseType::Movie => format!("{title} [{quality}][{language}]"),
    };

    context.row_index += 1;
    let publish_date = context.fetched_at - Duration::milliseconds(context.row_index);

    Ok(Some(RawItem {
        release_type,
        title: composed,
        details_uri,
        quality: Some(quality),
        language: Some(language),
        size_bytes: release::parse_size(size_text.trim()),
        publish_date,
    }))
}

/// Finds the series whose directory heading matches `series_name` and
/// returns the link to its episode list.
pub fn parse_series_directory(
    body: &str,
    page_url: &Url,
    series_name: &str,
    reporter: &dyn ParseFailureReporter,
) -> Option<Url> {
    let document = Html::parse_document(body);
    let wanted = series_name.trim().to_lowercase();

    for anchor in document.select(&DIRECTORY_SELECTOR) {
        let Some(heading) = anchor.select(&HEADING_SELECTOR).next() else {
            reporter.report_parse_failure(body, &ParseError::MissingElement("h2"));
            return None;
        };

        let heading = heading.text().collect::<String>().trim().to_lowercase();
        if heading != wanted {
            continue;
        }

        let href = anchor.value().attr("href").unwrap_or_default();
        return match resolve_link(page_url, href) {
            Ok(link) => Some(link),
            Err(error) => {
                reporter.report_parse_failure(body, &error);
                None
            }
        };
    }

    None
}

/// Parses one page of a series' episode list.
pub fn parse_episode_list(
    body: &str,
    page_url: &Url,
    reporter: &dyn ParseFailureReporter,
) -> PageItems<ReleaseRecord> {
    let document = Html::parse_document(body);
    let mut items = Vec::new();

    for row in document.select(&ROW_SELECTOR) {
        match episode_row(row, page_url) {
            Ok(item) => items.push(release::assemble(item)),
            Err(error) => {
                reporter.report_parse_failure(body, &error);
                return PageItems::Absent;
            }
        }
    }

    if items.is_empty() {
        return PageItems::Absent;
    }
    PageItems::Found(items)
}

fn episode_row(row: ElementRef<'_>, page_url: &Url) -> Result<RawItem, ParseError> {
    let anchor = first(row, &ANCHOR_SELECTOR, "a")?;
    let title = anchor
        .text()
        .collect::<String>()
        .replace('\t', "")
        .trim()
        .to_string();
    let details_uri = resolve_link(page_url, anchor.value().attr("href").unwrap_or_default())?;

    let date_text = child_text(row, 3)?;
    let size_text = child_text(row, 5)?;
    let publish_date =
        parse_dashed_date(date_text.trim()).ok_or_else(|| ParseError::InvalidDate(date_text))?;

    Ok(RawItem {
        release_type: ReleaseType::Tv,
        title,
        details_uri,
        quality: None,
        language: None,
        size_bytes: release::parse_size(size_text.trim()),
        publish_date,
    })
}

/// Parses the `/buscar` result markup. Series and game listings are dropped;
/// dates and sizes are best effort and fall back to `fetched_at` and zero.
///
/// Failures go to `reporter` when one is given. Callers still probing which
/// format a mirror serves pass `None`, and failures are only logged.
pub fn parse_search_markup(
    body: &str,
    page_url: &Url,
    fetched_at: OffsetDateTime,
    reporter: Option<&dyn ParseFailureReporter>,
) -> PageItems<ReleaseRecord> {
    let document = Html::parse_document(body);
    let mut items = Vec::new();
    let mut rows_seen = false;

    for row in document.select(&ROW_SELECTOR) {
        rows_seen = true;
        match search_row(row, page_url, fetched_at) {
            Ok(Some(item)) => items.push(release::assemble(item)),
            Ok(None) => {}
            Err(error) => {
                report_search_failure(body, &error, reporter);
                return PageItems::Absent;
            }
        }
    }

    if !rows_seen {
        return PageItems::Absent;
    }
    PageItems::from_items(items)
}

fn search_row(
    row: ElementRef<'_>,
    page_url: &Url,
    fetched_at: OffsetDateTime,
) -> Result<Option<RawItem>, ParseError> {
    let anchor = first(row, &ANCHOR_SELECTOR, "a")?;
    let heading = first(anchor, &HEADING_SELECTOR, "h2")?;
    let heading_text = heading.text().collect::<String>();
    let title = collapse_whitespace(&heading_text);

    let is_series = heading.select(&SPAN_SELECTOR).next().is_some()
        && heading_text.to_lowercase().contains("calidad");
    if is_series || is_game(&title) {
        return Ok(None);
    }

    let details_uri = resolve_link(page_url, anchor.value().attr("href").unwrap_or_default())?;

    let spans: Vec<ElementRef<'_>> = row.select(&SPAN_SELECTOR).collect();
    let span_text = |index: usize| {
        spans
            .get(index)
            .map(|span| span.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    };

    Ok(Some(RawItem {
        release_type: ReleaseType::Movie,
        title,
        details_uri,
        quality: None,
        language: None,
        size_bytes: release::parse_size(&span_text(2)),
        publish_date: parse_dashed_date(&span_text(1)).unwrap_or(fetched_at),
    }))
}

/// Parses the `/get/result/` JSON. Detail links are resolved against the
/// origin of `request_url`.
pub fn parse_search_json(
    body: &str,
    request_url: &Url,
    fetched_at: OffsetDateTime,
    reporter: Option<&dyn ParseFailureReporter>,
) -> PageItems<ReleaseRecord> {
    match search_json_items(body, request_url, fetched_at) {
        Ok(None) => PageItems::Absent,
        Ok(Some(items)) => PageItems::from_items(items.into_iter().map(release::assemble).collect()),
        Err(error) => {
            report_search_failure(body, &error, reporter);
            PageItems::Absent
        }
    }
}

fn report_search_failure(body: &str, error: &ParseError, reporter: Option<&dyn ParseFailureReporter>) {
    match reporter {
        Some(reporter) => reporter.report_parse_failure(body, error),
        None => debug!(error = %error, "search response not usable"),
    }
}

fn search_json_items(
    body: &str,
    request_url: &Url,
    fetched_at: OffsetDateTime,
) -> Result<Option<Vec<RawItem>>, ParseError> {
    let document: Value = serde_json::from_str(body)?;
    let data = document.get("data").ok_or(ParseError::MissingField("data"))?;

    let count = match data.get("items") {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or(ParseError::MissingField("data.items"))?;

    if count == 0 {
        return Ok(None);
    }

    let torrents = data
        .get("torrents")
        .and_then(|torrents| torrents.get("0"))
        .ok_or(ParseError::MissingField("data.torrents"))?;
    let origin = origin_of(request_url);

    let mut items = Vec::new();
    for index in 0..count {
        let entry = torrents
            .get(index.to_string())
            .ok_or(ParseError::MissingField("torrent entry"))?;

        let guid = json_text(entry, "guid")?;
        let title = json_text(entry, "torrentName")?;
        let date_text = json_text(entry, "torrentDateAdded")?;
        let quality = json_text(entry, "calidad")?;
        let size_text = json_text(entry, "torrentSize")?;

        if quality.to_lowercase().contains("hdtv") || is_game(&title) {
            continue;
        }

        items.push(RawItem {
            release_type: ReleaseType::Movie,
            details_uri: resolve_link(&origin, &guid)?,
            title,
            quality: Some(quality),
            language: None,
            size_bytes: release::parse_size(&size_text),
            publish_date: parse_slashed_date(&date_text).unwrap_or(fetched_at),
        });
    }

    Ok(Some(items))
}

fn json_text(entry: &Value, field: &'static str) -> Result<String, ParseError> {
    match entry.get(field) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => Err(ParseError::MissingField(field)),
        Some(other) => Ok(other.to_string()),
    }
}

fn is_game(title: &str) -> bool {
    title.to_lowercase().contains("pcdvd")
}

fn first<'a>(
    element: ElementRef<'a>,
    selector: &Selector,
    name: &'static str,
) -> Result<ElementRef<'a>, ParseError> {
    element
        .select(selector)
        .next()
        .ok_or(ParseError::MissingElement(name))
}

/// Text of the `index`th child node, counting text nodes.
fn child_text(element: ElementRef<'_>, index: usize) -> Result<String, ParseError> {
    let child = element
        .children()
        .nth(index)
        .ok_or(ParseError::MissingNode(index))?;

    Ok(match ElementRef::wrap(child) {
        Some(child) => child.text().collect(),
        None => child
            .value()
            .as_text()
            .map(|text| text.to_string())
            .unwrap_or_default(),
    })
}

fn resolve_link(base: &Url, href: &str) -> Result<Url, ParseError> {
    base.join(href.trim()).map_err(|source| ParseError::InvalidLink {
        href: href.to_string(),
        source,
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_dashed_date(text: &str) -> Option<OffsetDateTime> {
    Date::parse(text, format_description!("[day]-[month]-[year]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

fn parse_slashed_date(text: &str) -> Option<OffsetDateTime> {
    Date::parse(text, format_description!("[day]/[month]/[year]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}
