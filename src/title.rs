//! Release title extraction.
//!
//! Catalog titles come in two families: the verbose listing form
//! (`Serie Lost Temporada 1 Capitulo 5 - Español Calidad [HDTV]`) and the
//! classic bracket form (`Lost - Temporada 1 [HDTV][Cap.105][Español]`).
//! [`extract`] runs an ordered list of matchers and takes the first hit.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static STRUCTURED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Serie( *Descargar)?(.+?)(Temporada(.+?)(\d+)(.+?))?Capitulos?(.+?)(\d+)((.+?)(\d+))?(.+?)-(.+?)Calidad(.*)",
    )
    .expect("structured title pattern")
});

static CLASSIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\[[^\]]*\])?\[Cap\.(\d{1,2})(\d{2})([_-](\d{1,2})(\d{2}))?\]")
        .expect("classic title pattern")
});

static SHORTHAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(.+?)S0?(\d+)(E0?(\d+))?$").expect("search shorthand pattern")
});

static BRACKETS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[\]]+").expect("bracket run pattern"));

static DOT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[ \.]*\.").expect("dot run pattern"));

const SPANISH_MARKERS: &[&str] = &["español", "espanol", "castellano"];

/// What a matcher recovered from a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleMatch {
    pub series_name: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_range_end: Option<u32>,
    pub quality: Option<String>,
    pub audio: Option<String>,
    /// Replacement display title, when the matcher normalizes the layout.
    pub canonical_title: Option<String>,
}

type Matcher = fn(&str) -> Option<TitleMatch>;

const MATCHERS: &[Matcher] = &[match_structured, match_classic];

/// Removes tabs and swaps typographic dashes for ASCII ones.
pub fn sanitize(title: &str) -> String {
    title
        .replace('\t', "")
        .replace(['\u{2013}', '\u{2014}'], "-")
}

/// Runs the matcher cascade; `None` means the title is kept verbatim.
pub fn extract(title: &str) -> Option<TitleMatch> {
    MATCHERS.iter().find_map(|matcher| matcher(title))
}

fn match_structured(title: &str) -> Option<TitleMatch> {
    let captures = STRUCTURED_RE.captures(title)?;

    let series_name = group(&captures, 2)
        .trim_matches(|c| c == ' ' || c == '-')
        .to_string();
    // Single-season shows routinely omit the season; treat them as season 1.
    let season = captures
        .get(5)
        .map_or(Some(1), |m| m.as_str().trim().parse().ok())?;
    let episode: u32 = group(&captures, 8).trim().parse().ok()?;
    let episode_range_end = captures
        .get(11)
        .and_then(|m| m.as_str().trim().parse::<u32>().ok())
        .filter(|end| *end >= episode);
    let audio = trim_bracketed(group(&captures, 13));
    let quality = trim_bracketed(group(&captures, 14));

    let canonical_title = canonical_title(
        &series_name,
        season,
        episode,
        episode_range_end,
        &quality,
        &audio,
    );

    Some(TitleMatch {
        series_name: Some(series_name),
        season: Some(season),
        episode: Some(episode),
        episode_range_end,
        quality: Some(quality),
        audio: Some(audio),
        canonical_title: Some(canonical_title),
    })
}

fn match_classic(title: &str) -> Option<TitleMatch> {
    let captures = CLASSIC_RE.captures(title)?;

    let season = captures.get(2).and_then(|m| m.as_str().parse().ok());
    let episode = captures.get(3).and_then(|m| m.as_str().parse().ok());
    let episode_range_end = captures
        .get(6)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|end| episode.is_none_or(|start| *end >= start));

    Some(TitleMatch {
        season,
        episode,
        episode_range_end,
        quality: captures.get(1).map(|m| m.as_str().to_string()),
        ..TitleMatch::default()
    })
}

/// `Series - Temporada N [Quality][Cap.NEE(_NEE)][Audio]`
pub fn canonical_title(
    series_name: &str,
    season: u32,
    episode: u32,
    episode_range_end: Option<u32>,
    quality: &str,
    audio: &str,
) -> String {
    let range = episode_range_end
        .map(|end| format!("_{season}{end:02}"))
        .unwrap_or_default();
    format!("{series_name} - Temporada {season} [{quality}][Cap.{season}{episode:02}{range}][{audio}]")
}

/// Inputs for the final dotted title.
#[derive(Debug, Clone, Copy)]
pub struct FixedTitleParts<'a> {
    pub working_title: &'a str,
    pub series_name: &'a str,
    pub is_tv: bool,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_range_end: Option<u32>,
    pub quality: &'a str,
    pub language: &'a str,
}

/// Builds `Series.SxxEyy[-zz].Quality.Language[.Spanish]`.
pub fn fixed_title(parts: FixedTitleParts<'_>) -> String {
    let series_name = parts.series_name;
    let mut tokens: Vec<String> = vec![series_name.to_string()];

    let quality = if parts.is_tv && parts.quality.is_empty() {
        "HDTV"
    } else {
        parts.quality
    };

    if parts.is_tv {
        let mut marker = format!(
            "S{:02}E{:02}",
            parts.season.unwrap_or(0),
            parts.episode.unwrap_or(0)
        );
        if let Some(end) = parts.episode_range_end
            && end != 0
            && Some(end) != parts.episode
        {
            marker.push_str(&format!("-{end:02}"));
        }
        tokens.push(marker);
    }

    if !quality.is_empty() && !series_name.contains(quality) {
        tokens.push(quality.to_string());
    }

    if !parts.language.trim().is_empty() && !series_name.contains(parts.language) {
        tokens.push(parts.language.to_string());
    }

    if is_spanish(parts.working_title) {
        tokens.push("Spanish".to_string());
    }

    let joined = tokens.join(".");
    let joined = BRACKETS_RE.replace_all(&joined, ".");
    DOT_RUN_RE.replace_all(&joined, ".").into_owned()
}

/// Fallback series name for titles no matcher understood.
pub fn fallback_series_name(title: &str, is_tv: bool) -> String {
    if is_tv && let Some((head, _)) = title.split_once('-') {
        return head.trim().to_string();
    }
    title.to_string()
}

fn is_spanish(title: &str) -> bool {
    let lowered = title.to_lowercase();
    SPANISH_MARKERS.iter().any(|marker| lowered.contains(marker)) || lowered.ends_with("espa")
}

/// Season/episode embedded in a search term, e.g. `Lost S02E05`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchShorthand {
    pub series_name: String,
    pub season: u32,
    pub episode: Option<u32>,
}

pub fn parse_search_shorthand(term: &str) -> Option<SearchShorthand> {
    let captures = SHORTHAND_RE.captures(term)?;
    Some(SearchShorthand {
        series_name: group(&captures, 1).trim().to_string(),
        season: group(&captures, 2).parse().ok()?,
        episode: captures.get(4).and_then(|m| m.as_str().parse().ok()),
    })
}

fn group<'t>(captures: &Captures<'t>, index: usize) -> &'t str {
    captures.get(index).map_or("", |m| m.as_str())
}

fn trim_bracketed(value: &str) -> String {
    value
        .trim_matches(|c| c == ' ' || c == '[' || c == ']')
        .to_string()
}
