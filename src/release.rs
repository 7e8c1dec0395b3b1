use std::sync::LazyLock;

use regex::Regex;
use time::OffsetDateTime;
use url::Url;

use crate::title::{self, FixedTitleParts};
use crate::torznab;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*([KMGT]i?B|bytes|B)\b").expect("size pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseType {
    Tv,
    Movie,
}

impl ReleaseType {
    /// The feed tags TV rows with an HDTV quality marker; everything else is a film.
    pub fn from_quality(quality: &str) -> Self {
        if quality.trim().to_lowercase().starts_with("hdtv") {
            ReleaseType::Tv
        } else {
            ReleaseType::Movie
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRecord {
    pub title: String,
    pub series_name: String,
    pub release_type: ReleaseType,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_range_end: Option<u32>,
    pub quality: String,
    pub language: String,
    pub size_bytes: u64,
    pub publish_date: OffsetDateTime,
    pub details_uri: Url,
    pub category_ids: Vec<u32>,
    pub score: u32,
}

impl ReleaseRecord {
    /// Feed identity: the same title served from the same page.
    pub fn same_item(&self, title: &str, details_uri: &Url) -> bool {
        self.title == title && &self.details_uri == details_uri
    }

    /// Whether this record answers a request for `season`/`episode`.
    /// Unknown values on either side never exclude; an episode range selects
    /// every episode it covers.
    pub fn covers(&self, season: Option<u32>, episode: Option<u32>) -> bool {
        if let (Some(wanted), Some(actual)) = (season, self.season)
            && wanted != actual
        {
            return false;
        }

        match (episode, self.episode) {
            (Some(wanted), Some(first)) => match self.episode_range_end {
                Some(last) => (first..=last).contains(&wanted),
                None => wanted == first,
            },
            _ => true,
        }
    }
}

/// One row as scraped, before title extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub release_type: ReleaseType,
    pub title: String,
    pub details_uri: Url,
    pub quality: Option<String>,
    pub language: Option<String>,
    pub size_bytes: u64,
    pub publish_date: OffsetDateTime,
}

/// Runs extraction on a scraped row and produces the final record.
pub fn assemble(raw: RawItem) -> ReleaseRecord {
    let RawItem {
        release_type,
        title,
        details_uri,
        quality,
        language,
        size_bytes,
        publish_date,
    } = raw;

    let sanitized = title::sanitize(&title);
    let mut quality = quality.unwrap_or_default();
    let mut language = language.unwrap_or_default();

    let matched = title::extract(&sanitized).unwrap_or_default();
    if let Some(audio) = matched.audio.as_ref()
        && language.is_empty()
    {
        language = audio.clone();
    }
    if let Some(matched_quality) = matched.quality.as_ref() {
        quality = matched_quality.clone();
    }

    let is_tv = release_type == ReleaseType::Tv;
    let working_title = match (&matched.canonical_title, is_tv) {
        (Some(canonical), true) => canonical.clone(),
        _ => sanitized,
    };

    let series_name = matched
        .series_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| title::fallback_series_name(&working_title, is_tv));

    let category_ids = match release_type {
        ReleaseType::Tv if quality.contains("720") || quality.contains("1080") => {
            vec![torznab::TV_HD_CATEGORY_ID]
        }
        ReleaseType::Tv => vec![torznab::TV_CATEGORY.id],
        ReleaseType::Movie => vec![torznab::MOVIE_CATEGORY.id],
    };

    let display_title = title::fixed_title(FixedTitleParts {
        working_title: &working_title,
        series_name: &series_name,
        is_tv,
        season: matched.season,
        episode: matched.episode,
        episode_range_end: matched.episode_range_end,
        quality: &quality,
        language: &language,
    });

    ReleaseRecord {
        title: display_title,
        series_name,
        release_type,
        season: matched.season,
        episode: matched.episode,
        episode_range_end: matched.episode_range_end,
        quality,
        language,
        size_bytes,
        publish_date,
        details_uri,
        category_ids,
        score: 0,
    }
}

/// Best-effort `"1,5 GB"` / `"700 MB"` → bytes; 0 when unreadable.
pub fn parse_size(text: &str) -> u64 {
    let Some(captures) = SIZE_RE.captures(text) else {
        return 0;
    };

    let Ok(value) = captures[1].replace(',', ".").parse::<f64>() else {
        return 0;
    };

    let multiplier: f64 = match captures[2].to_ascii_uppercase().chars().next() {
        Some('K') => 1024.0,
        Some('M') => 1024.0 * 1024.0,
        Some('G') => 1024.0 * 1024.0 * 1024.0,
        Some('T') => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };

    (value * multiplier).round() as u64
}
