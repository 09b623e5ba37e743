#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tube_scanner::db::{self, Pool};
use tube_scanner::extract::ChannelInfo;
use tube_scanner::model::Channel;
use tube_scanner::source::PageSource;

pub async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Serves canned HTML per URL and records every fetch.
#[derive(Clone, Default)]
pub struct FakeSource {
    pages: Arc<Mutex<HashMap<String, String>>>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub async fn serve(&self, url: String, html: String) {
        self.pages.lock().await.insert(url, html);
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.fetched.lock().await.push(url.to_string());
        self.pages
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {}", url))
    }
}

pub struct Video<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub style: &'a str,
    pub ago: Option<&'a str>,
}

/// A rich-grid listing page for channel `channel_id`.
pub fn listing(channel_id: &str, title: &str, with_streams_tab: bool, videos: &[Video]) -> String {
    let contents: Vec<Value> = videos
        .iter()
        .map(|v| {
            let mut renderer = json!({
                "videoId": v.id,
                "title": { "runs": [{ "text": v.title }] },
                "thumbnailOverlays": [
                    { "thumbnailOverlayTimeStatusRenderer": { "style": v.style } }
                ]
            });
            if let Some(ago) = v.ago {
                renderer["publishedTimeText"] = json!({ "simpleText": ago });
            }
            json!({ "richItemRenderer": { "content": { "videoRenderer": renderer } } })
        })
        .collect();

    let mut tabs = vec![json!({ "tabRenderer": {
        "endpoint": { "commandMetadata": { "webCommandMetadata": {
            "url": format!("/channel/{}/videos", channel_id) } } },
        "content": { "richGridRenderer": { "contents": contents } }
    } })];
    if with_streams_tab {
        tabs.push(json!({ "tabRenderer": {
            "endpoint": { "commandMetadata": { "webCommandMetadata": {
                "url": format!("/channel/{}/streams", channel_id) } } }
        } }));
    }

    let data = json!({
        "header": { "c4TabbedHeaderRenderer": {
            "channelId": channel_id,
            "title": title,
            "navigationEndpoint": { "browseEndpoint": { "canonicalBaseUrl": format!("/@{}", title) } }
        } },
        "contents": { "twoColumnBrowseResultsRenderer": { "tabs": tabs } }
    });
    format!(
        "<html><body><script>var ytInitialData = {};</script></body></html>",
        data
    )
}

pub async fn add_channel(pool: &Pool, original_id: &str, title: &str) -> Channel {
    db::upsert_channel(
        pool,
        &ChannelInfo {
            channel_id: original_id.into(),
            title: title.into(),
            canonical_base_url: None,
        },
    )
    .await
    .unwrap()
}

pub async fn subscribe(pool: &Pool, channel: &Channel, chat_id: i64) {
    db::upsert_destination(pool, chat_id, None, None).await.unwrap();
    db::add_subscription(pool, channel.id, chat_id, None)
        .await
        .unwrap();
}
