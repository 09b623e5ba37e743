//! Extraction of channel listings from the `ytInitialData` blob embedded in
//! channel pages.
//!
//! Two listing layouts are known: the older section list (`sectionListRenderer`
//! wrapping a `gridRenderer`) and the rich grid (`richGridRenderer`). Both are
//! normalised into [`RawItem`] records.
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tree::{self, ByKey, BySubPath, Step};

static DATA_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*var\s+ytInitialData\s*=\s*").expect("valid ytInitialData regex")
});
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("valid selector"));

const NO_VIDEOS_SENTINEL: &str = "This channel has no videos.";

const TAB_CONTENT: &[Step] = &[Step::Key("tabRenderer"), Step::Key("content")];
const TAB_RENDERER: &[Step] = &[Step::Key("tabRenderer")];
const TAB_URL: &[Step] = &[
    Step::Key("endpoint"),
    Step::Key("commandMetadata"),
    Step::Key("webCommandMetadata"),
    Step::Key("url"),
];
const FIRST_SECTION: &[Step] = &[
    Step::Key("itemSectionRenderer"),
    Step::Key("contents"),
    Step::Index(0),
];
const GRID_ITEMS: &[Step] = &[Step::Key("gridRenderer"), Step::Key("items")];
const NO_VIDEOS_TEXT: &[Step] = &[
    Step::Key("messageRenderer"),
    Step::Key("text"),
    Step::Key("simpleText"),
];
const RICH_VIDEO: &[Step] = &[Step::Key("content"), Step::Key("videoRenderer")];
const TITLE_RUN: &[Step] = &[
    Step::Key("title"),
    Step::Key("runs"),
    Step::Index(0),
    Step::Key("text"),
];
const TITLE_SIMPLE: &[Step] = &[Step::Key("title"), Step::Key("simpleText")];
const OVERLAY_STYLE: &[Step] = &[
    Step::Key("thumbnailOverlayTimeStatusRenderer"),
    Step::Key("style"),
];
const PUBLISHED: &[Step] = &[Step::Key("publishedTimeText"), Step::Key("simpleText")];
const HEADER: &[Step] = &[Step::Key("c4TabbedHeaderRenderer"), Step::Key("channelId")];
const HEADER_BASE_URL: &[Step] = &[
    Step::Key("navigationEndpoint"),
    Step::Key("browseEndpoint"),
    Step::Key("canonicalBaseUrl"),
];
const METADATA: &[Step] = &[Step::Key("channelMetadataRenderer"), Step::Key("externalId")];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("embedded ytInitialData payload not found")]
    PayloadNotFound,
    #[error("listing renderer not found")]
    RendererNotFound,
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One listing entry as it appears on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub style: Option<String>,
    pub time_ago: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: String,
    pub canonical_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPage {
    pub tab_urls: Vec<String>,
    pub items: Vec<RawItem>,
    pub header: Option<ChannelInfo>,
}

impl ChannelPage {
    pub fn has_streams_tab(&self) -> bool {
        self.tab_urls.iter().any(|url| url.ends_with("/streams"))
    }
}

/// Return the object literal assigned right after `marker` in `script`.
///
/// Braces inside single- or double-quoted strings are ignored, and a backslash
/// escapes the next character inside a string.
pub fn assigned_object<'a>(script: &'a str, marker: &Regex) -> Result<&'a str, ExtractError> {
    let start = marker.find(script).ok_or(ExtractError::PayloadNotFound)?.end();
    balanced_object(&script[start..])
}

/// Slice a balanced `{ ... }` from the start of `src`.
pub fn balanced_object(src: &str) -> Result<&str, ExtractError> {
    if !src.starts_with('{') {
        return Err(ExtractError::PayloadNotFound);
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in src.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&src[..i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Err(ExtractError::PayloadNotFound)
}

/// Locate the data script in an HTML document and parse its payload.
pub fn initial_data(html: &str) -> Result<Value, ExtractError> {
    let document = Html::parse_document(html);
    let script = document
        .select(&SCRIPT)
        .map(|el| el.text().collect::<String>())
        .find(|text| DATA_MARKER.is_match(text))
        .ok_or(ExtractError::PayloadNotFound)?;
    let payload = assigned_object(&script, &DATA_MARKER)?;
    Ok(serde_json::from_str(payload)?)
}

/// Parse a channel listing page (videos or streams tab).
pub fn parse_channel_page(html: &str) -> Result<ChannelPage, ExtractError> {
    let data = initial_data(html)?;
    Ok(ChannelPage {
        tab_urls: tab_urls(&data)?,
        items: listing_items(&data)?,
        header: channel_header(&data).ok(),
    })
}

/// Parse only the channel header of a page.
pub fn parse_channel_info(html: &str) -> Result<ChannelInfo, ExtractError> {
    channel_header(&initial_data(html)?)
}

fn tab_urls(data: &Value) -> Result<Vec<String>, ExtractError> {
    let tabs = tree::find_first(data, &ByKey("tabs")).map_err(|_| ExtractError::MissingField("tabs"))?;
    Ok(tree::find_all(tabs, &BySubPath::new(TAB_RENDERER))
        .into_iter()
        .filter_map(|tab| tree::find_first(tab, &BySubPath::new(TAB_URL)).ok())
        .filter_map(|url| url.as_str().map(str::to_owned))
        .collect())
}

fn listing_items(data: &Value) -> Result<Vec<RawItem>, ExtractError> {
    let content = tree::find_first(data, &BySubPath::new(TAB_CONTENT))
        .map_err(|_| ExtractError::RendererNotFound)?;
    if let Some(renderer) = content.get("sectionListRenderer") {
        section_list_items(renderer)
    } else if let Some(renderer) = content.get("richGridRenderer") {
        rich_grid_items(renderer)
    } else {
        Err(ExtractError::RendererNotFound)
    }
}

fn has_no_videos(section: &Value) -> bool {
    tree::get(section, NO_VIDEOS_TEXT).and_then(Value::as_str) == Some(NO_VIDEOS_SENTINEL)
}

fn section_list_items(renderer: &Value) -> Result<Vec<RawItem>, ExtractError> {
    let section = tree::find_first(renderer, &BySubPath::new(FIRST_SECTION))
        .map_err(|_| ExtractError::RendererNotFound)?;
    let items = match tree::find_first(section, &BySubPath::new(GRID_ITEMS)) {
        Ok(items) => items,
        Err(_) if has_no_videos(section) => return Ok(Vec::new()),
        Err(_) => return Err(ExtractError::RendererNotFound),
    };
    items
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("gridVideoRenderer"))
        .map(raw_item)
        .collect()
}

fn rich_grid_items(renderer: &Value) -> Result<Vec<RawItem>, ExtractError> {
    let items = tree::find_first(renderer, &ByKey("contents"))
        .map_err(|_| ExtractError::RendererNotFound)?;
    let mut out = Vec::new();
    for item in items.as_array().into_iter().flatten() {
        let Some(wrapper) = item.get("richItemRenderer") else {
            continue;
        };
        let video = tree::find_first(wrapper, &BySubPath::new(RICH_VIDEO))
            .map_err(|_| ExtractError::MissingField("videoRenderer"))?;
        out.push(raw_item(video)?);
    }
    Ok(out)
}

fn string_at(node: &Value, steps: &'static [Step]) -> Option<String> {
    tree::find_first(node, &BySubPath::new(steps))
        .ok()
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn raw_item(renderer: &Value) -> Result<RawItem, ExtractError> {
    let id = tree::find_first(renderer, &ByKey("videoId"))
        .ok()
        .and_then(Value::as_str)
        .ok_or(ExtractError::MissingField("videoId"))?;
    let title = string_at(renderer, TITLE_RUN)
        .or_else(|| string_at(renderer, TITLE_SIMPLE))
        .ok_or(ExtractError::MissingField("title"))?;
    Ok(RawItem {
        id: id.to_owned(),
        title,
        style: string_at(renderer, OVERLAY_STYLE),
        time_ago: tree::get(renderer, PUBLISHED)
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

fn channel_header(data: &Value) -> Result<ChannelInfo, ExtractError> {
    if let Ok(header) = tree::find_first(data, &BySubPath::new(HEADER).returning_root()) {
        let channel_id = header.get("channelId").and_then(Value::as_str);
        let title = header.get("title").and_then(Value::as_str);
        return Ok(ChannelInfo {
            channel_id: channel_id.ok_or(ExtractError::MissingField("channelId"))?.to_owned(),
            title: title.ok_or(ExtractError::MissingField("title"))?.to_owned(),
            canonical_base_url: tree::get(header, HEADER_BASE_URL)
                .and_then(Value::as_str)
                .map(str::to_owned),
        });
    }

    let meta = tree::find_first(data, &BySubPath::new(METADATA).returning_root())
        .map_err(|_| ExtractError::MissingField("channelId"))?;
    Ok(ChannelInfo {
        channel_id: meta
            .get("externalId")
            .and_then(Value::as_str)
            .ok_or(ExtractError::MissingField("channelId"))?
            .to_owned(),
        title: meta
            .get("title")
            .and_then(Value::as_str)
            .ok_or(ExtractError::MissingField("title"))?
            .to_owned(),
        canonical_base_url: meta
            .get("vanityChannelUrl")
            .and_then(Value::as_str)
            .and_then(url_path),
    })
}

fn url_path(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find('/').map(|i| rest[i..].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(data: &Value) -> String {
        format!(
            "<html><head><script>var other = {{}};</script></head><body>\
             <script nonce=\"x\">var ytInitialData = {};</script></body></html>",
            data
        )
    }

    fn tabs(content: Value) -> Value {
        json!({
            "header": {
                "c4TabbedHeaderRenderer": {
                    "channelId": "UC1",
                    "title": "First Channel",
                    "navigationEndpoint": { "browseEndpoint": { "canonicalBaseUrl": "/@first" } }
                }
            },
            "contents": { "twoColumnBrowseResultsRenderer": { "tabs": [
                { "tabRenderer": {
                    "endpoint": { "commandMetadata": { "webCommandMetadata": { "url": "/@first/featured" } } },
                    "title": "Home"
                } },
                { "tabRenderer": {
                    "endpoint": { "commandMetadata": { "webCommandMetadata": { "url": "/@first/videos" } } },
                    "selected": true,
                    "content": content
                } },
                { "tabRenderer": {
                    "endpoint": { "commandMetadata": { "webCommandMetadata": { "url": "/@first/streams" } } }
                } },
                { "expandableTabRenderer": { "title": "Search" } }
            ] } }
        })
    }

    fn renderer(id: &str, title: &str, style: &str, ago: Option<&str>) -> Value {
        let mut r = json!({
            "videoId": id,
            "title": { "runs": [{ "text": title }] },
            "thumbnailOverlays": [
                { "thumbnailOverlayTimeStatusRenderer": { "style": style } }
            ]
        });
        if let Some(ago) = ago {
            r["publishedTimeText"] = json!({ "simpleText": ago });
        }
        r
    }

    #[test]
    fn payload_scan_ignores_quoted_braces() {
        let marker = Regex::new(r"var\s+x\s*=\s*").unwrap();
        let script = r#"var x = {"a": "}", 'b': 1};"#;
        assert_eq!(
            assigned_object(script, &marker).unwrap(),
            r#"{"a": "}", 'b': 1}"#
        );
    }

    #[test]
    fn payload_scan_honours_escapes() {
        let src = r#"{"a": "say \"}\" ok", "b": {"c": '\'}'}} trailing"#;
        assert_eq!(
            balanced_object(src).unwrap(),
            r#"{"a": "say \"}\" ok", "b": {"c": '\'}'}}"#
        );
    }

    #[test]
    fn unbalanced_payload_is_an_error() {
        assert!(matches!(
            balanced_object(r#"{"a": {"b": 1}"#),
            Err(ExtractError::PayloadNotFound)
        ));
        assert!(matches!(
            balanced_object("null;"),
            Err(ExtractError::PayloadNotFound)
        ));
    }

    #[test]
    fn missing_script_is_payload_not_found() {
        let html = "<html><script>var foo = {};</script></html>";
        assert!(matches!(
            parse_channel_page(html),
            Err(ExtractError::PayloadNotFound)
        ));
    }

    #[test]
    fn rich_grid_items_are_extracted() {
        let content = json!({ "richGridRenderer": { "contents": [
            { "richItemRenderer": { "content": { "videoRenderer":
                renderer("v1", "First video", "DEFAULT", Some("2 hours ago")) } } },
            { "richItemRenderer": { "content": { "videoRenderer":
                renderer("v2", "Live now", "LIVE", None) } } },
            { "continuationItemRenderer": { "trigger": "x" } }
        ] } });
        let parsed = parse_channel_page(&page(&tabs(content))).unwrap();

        assert_eq!(
            parsed.tab_urls,
            vec!["/@first/featured", "/@first/videos", "/@first/streams"]
        );
        assert!(parsed.has_streams_tab());
        assert_eq!(
            parsed.items,
            vec![
                RawItem {
                    id: "v1".into(),
                    title: "First video".into(),
                    style: Some("DEFAULT".into()),
                    time_ago: Some("2 hours ago".into()),
                },
                RawItem {
                    id: "v2".into(),
                    title: "Live now".into(),
                    style: Some("LIVE".into()),
                    time_ago: None,
                },
            ]
        );
        assert_eq!(parsed.header.unwrap().channel_id, "UC1");
    }

    #[test]
    fn section_list_matches_rich_grid_shape() {
        let content = json!({ "sectionListRenderer": { "contents": [
            { "itemSectionRenderer": { "contents": [
                { "gridRenderer": { "items": [
                    { "gridVideoRenderer": renderer("v1", "First video", "DEFAULT", Some("2 hours ago")) },
                    { "gridPlaylistRenderer": { "playlistId": "p" } }
                ] } }
            ] } }
        ] } });
        let parsed = parse_channel_page(&page(&tabs(content))).unwrap();
        assert_eq!(
            parsed.items,
            vec![RawItem {
                id: "v1".into(),
                title: "First video".into(),
                style: Some("DEFAULT".into()),
                time_ago: Some("2 hours ago".into()),
            }]
        );
    }

    #[test]
    fn empty_section_list_with_sentinel_is_ok() {
        let content = json!({ "sectionListRenderer": { "contents": [
            { "itemSectionRenderer": { "contents": [
                { "messageRenderer": { "text": { "simpleText": "This channel has no videos." } } }
            ] } }
        ] } });
        let parsed = parse_channel_page(&page(&tabs(content))).unwrap();
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn empty_section_list_without_sentinel_fails() {
        let content = json!({ "sectionListRenderer": { "contents": [
            { "itemSectionRenderer": { "contents": [
                { "messageRenderer": { "text": { "simpleText": "Something else" } } }
            ] } }
        ] } });
        assert!(matches!(
            parse_channel_page(&page(&tabs(content))),
            Err(ExtractError::RendererNotFound)
        ));
    }

    #[test]
    fn unknown_renderer_fails() {
        let content = json!({ "playlistVideoListRenderer": { "contents": [] } });
        assert!(matches!(
            parse_channel_page(&page(&tabs(content))),
            Err(ExtractError::RendererNotFound)
        ));
    }

    #[test]
    fn channel_info_from_tabbed_header() {
        let info = parse_channel_info(&page(&tabs(json!({})))).unwrap();
        assert_eq!(
            info,
            ChannelInfo {
                channel_id: "UC1".into(),
                title: "First Channel".into(),
                canonical_base_url: Some("/@first".into()),
            }
        );
    }

    #[test]
    fn channel_info_from_metadata_fallback() {
        let data = json!({ "metadata": { "channelMetadataRenderer": {
            "externalId": "UC9",
            "title": "Metadata Channel",
            "vanityChannelUrl": "http://www.youtube.com/@meta"
        } } });
        let info = parse_channel_info(&page(&data)).unwrap();
        assert_eq!(info.channel_id, "UC9");
        assert_eq!(info.canonical_base_url.as_deref(), Some("/@meta"));
    }

    #[test]
    fn channel_info_requires_title() {
        let data = json!({ "header": { "c4TabbedHeaderRenderer": { "channelId": "UC1" } } });
        assert!(matches!(
            parse_channel_info(&page(&data)),
            Err(ExtractError::MissingField("title"))
        ));
    }
}
