use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc2822};

#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    pub title: String,
    pub description: String,
    pub site_link: String,
    pub default_limit: usize,
}

#[derive(Debug, Clone)]
pub struct TorznabItem {
    pub title: String,
    pub guid: String,
    pub link: String,
    pub comments: String,
    pub published: OffsetDateTime,
    pub size_bytes: u64,
    pub categories: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct TorznabCategory {
    pub id: u32,
    pub name: &'static str,
    pub subcategories: &'static [TorznabSubCategory],
}

#[derive(Debug, Clone)]
pub struct TorznabSubCategory {
    pub id: u32,
    pub name: &'static str,
}

pub const TV_SD_CATEGORY_ID: u32 = 5030;
pub const TV_HD_CATEGORY_ID: u32 = 5040;

pub const TV_CATEGORY: TorznabCategory = TorznabCategory {
    id: 5000,
    name: "TV",
    subcategories: &[
        TorznabSubCategory { id: 5010, name: "TV/WEB-DL" },
        TorznabSubCategory { id: 5020, name: "TV/Foreign" },
        TorznabSubCategory { id: TV_SD_CATEGORY_ID, name: "TV/SD" },
        TorznabSubCategory { id: TV_HD_CATEGORY_ID, name: "TV/HD" },
        TorznabSubCategory { id: 5045, name: "TV/UHD" },
        TorznabSubCategory { id: 5050, name: "TV/Other" },
        TorznabSubCategory { id: 5060, name: "TV/Sport" },
        TorznabSubCategory { id: 5070, name: "TV/Anime" },
        TorznabSubCategory { id: 5080, name: "TV/Documentary" },
    ],
};

pub const MOVIE_CATEGORY: TorznabCategory = TorznabCategory {
    id: 2000,
    name: "Movies",
    subcategories: &[
        TorznabSubCategory { id: 2010, name: "Movies/Foreign" },
        TorznabSubCategory { id: 2020, name: "Movies/Other" },
        TorznabSubCategory { id: 2030, name: "Movies/SD" },
        TorznabSubCategory { id: 2040, name: "Movies/HD" },
        TorznabSubCategory { id: 2045, name: "Movies/UHD" },
        TorznabSubCategory { id: 2050, name: "Movies/BluRay" },
        TorznabSubCategory { id: 2060, name: "Movies/3D" },
        TorznabSubCategory { id: 2070, name: "Movies/DVD" },
        TorznabSubCategory { id: 2080, name: "Movies/WEB-DL" },
    ],
};

/// Subcategories advertised in caps; the rest of the taxonomy is only
/// accepted as a filter.
const ADVERTISED: &[(u32, &[u32])] = &[
    (5000, &[TV_SD_CATEGORY_ID, TV_HD_CATEGORY_ID]),
    (2000, &[]),
];

impl TorznabCategory {
    /// True when `id` is this category or one of its subcategories.
    pub fn contains(&self, id: u32) -> bool {
        self.id == id || self.subcategories.iter().any(|sub| sub.id == id)
    }
}

pub fn default_categories() -> Vec<TorznabCategory> {
    vec![TV_CATEGORY, MOVIE_CATEGORY]
}

#[derive(Debug, Error)]
pub enum TorznabBuildError {
    #[error("failed to build XML document")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to write XML document")]
    Io(#[from] std::io::Error),
    #[error("failed to format XML document as UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("failed to format timestamp in RFC2822 format")]
    Timestamp(#[from] time::error::Format),
}

pub fn render_caps(metadata: &ChannelMetadata) -> Result<String, TorznabBuildError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("caps")))?;

    let mut server = BytesStart::new("server");
    server.push_attribute(("title", metadata.title.as_str()));
    server.push_attribute(("description", metadata.description.as_str()));
    server.push_attribute(("version", env!("CARGO_PKG_VERSION")));
    writer.write_event(Event::Empty(server))?;

    let limit = metadata.default_limit.to_string();
    let mut limits = BytesStart::new("limits");
    limits.push_attribute(("default", limit.as_str()));
    limits.push_attribute(("max", limit.as_str()));
    limits.push_attribute(("min", "1"));
    writer.write_event(Event::Empty(limits))?;

    writer.write_event(Event::Start(BytesStart::new("searching")))?;

    let mut search_el = BytesStart::new("search");
    search_el.push_attribute(("available", "yes"));
    search_el.push_attribute(("supportedParams", "q"));
    writer.write_event(Event::Empty(search_el))?;

    let mut tv_search_el = BytesStart::new("tv-search");
    tv_search_el.push_attribute(("available", "yes"));
    tv_search_el.push_attribute(("supportedParams", "q,season,ep"));
    writer.write_event(Event::Empty(tv_search_el))?;

    let mut movie_search_el = BytesStart::new("movie-search");
    movie_search_el.push_attribute(("available", "yes"));
    movie_search_el.push_attribute(("supportedParams", "q"));
    writer.write_event(Event::Empty(movie_search_el))?;

    writer.write_event(Event::End(BytesEnd::new("searching")))?;

    writer.write_event(Event::Start(BytesStart::new("categories")))?;

    for category in default_categories() {
        let advertised: &[u32] = ADVERTISED
            .iter()
            .find(|(id, _)| *id == category.id)
            .map_or(&[], |(_, subs)| *subs);

        let id_attr = category.id.to_string();
        let mut category_el = BytesStart::new("category");
        category_el.push_attribute(("id", id_attr.as_str()));
        category_el.push_attribute(("name", category.name));

        if advertised.is_empty() {
            writer.write_event(Event::Empty(category_el))?;
            continue;
        }

        writer.write_event(Event::Start(category_el))?;
        for sub in category
            .subcategories
            .iter()
            .filter(|sub| advertised.contains(&sub.id))
        {
            let sub_id = sub.id.to_string();
            let mut sub_el = BytesStart::new("subcat");
            sub_el.push_attribute(("id", sub_id.as_str()));
            sub_el.push_attribute(("name", sub.name));
            writer.write_event(Event::Empty(sub_el))?;
        }
        writer.write_event(Event::End(BytesEnd::new("category")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("categories")))?;

    writer.write_event(Event::End(BytesEnd::new("caps")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

pub fn render_feed(
    metadata: &ChannelMetadata,
    items: &[TorznabItem],
) -> Result<String, TorznabBuildError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"));
    writer.write_event(Event::Start(rss))?;

    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text_element(&mut writer, "title", &metadata.title)?;
    write_text_element(&mut writer, "description", &metadata.description)?;
    write_text_element(&mut writer, "link", &metadata.site_link)?;

    for item in items.iter() {
        writer.write_event(Event::Start(BytesStart::new("item")))?;
        write_text_element(&mut writer, "title", &item.title)?;
        write_text_element(&mut writer, "guid", &item.guid)?;
        write_text_element(&mut writer, "link", &item.link)?;
        write_text_element(&mut writer, "comments", &item.comments)?;

        let formatted = item.published.format(&Rfc2822)?;
        write_text_element(&mut writer, "pubDate", &formatted)?;

        write_text_element(&mut writer, "size", &item.size_bytes.to_string())?;

        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", item.link.as_str()));
        enclosure.push_attribute(("type", "application/x-bittorrent"));
        enclosure.push_attribute(("length", item.size_bytes.to_string().as_str()));
        writer.write_event(Event::Empty(enclosure))?;

        for category_id in &item.categories {
            write_text_element(&mut writer, "category", &category_id.to_string())?;
            write_attr(&mut writer, "category", &category_id.to_string())?;
        }
        // The catalog publishes no swarm data and does not count downloads.
        write_attr(&mut writer, "seeders", "1")?;
        write_attr(&mut writer, "peers", "1")?;
        write_attr(&mut writer, "downloadvolumefactor", "0")?;
        write_attr(&mut writer, "uploadvolumefactor", "1")?;

        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), TorznabBuildError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_attr(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), TorznabBuildError> {
    let mut attr = BytesStart::new("torznab:attr");
    attr.push_attribute(("name", name));
    attr.push_attribute(("value", value));
    writer.write_event(Event::Empty(attr))?;
    Ok(())
}
