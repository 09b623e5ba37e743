//! Sequential, paced scanning of channel listing pages.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::extract::{self, ChannelPage, RawItem};
use crate::format;
use crate::model::{Channel, ChannelScan, Item, ScanResult};
use crate::source::PageSource;
use crate::timeago;

/// Turn raw page records into items owned by `channel`.
///
/// Records without a publication phrase are stamped with `captured_at`.
pub fn to_items(
    channel: &Channel,
    raw: Vec<RawItem>,
    captured_at: DateTime<Utc>,
) -> Result<Vec<Item>, timeago::TimeAgoError> {
    raw.into_iter()
        .map(|r| {
            let created_at = match r.time_ago.as_deref() {
                Some(text) => timeago::resolve(text, captured_at)?,
                None => captured_at,
            };
            Ok(Item {
                original_id: r.id,
                channel_id: channel.id,
                title: r.title,
                style: r.style,
                time_ago: r.time_ago,
                created_at,
                scanned_at: captured_at,
                live_continuous: false,
            })
        })
        .collect()
}

async fn fetch_page(source: &dyn PageSource, url: &str) -> Result<ChannelPage> {
    let html = source.fetch(url).await?;
    extract::parse_channel_page(&html).with_context(|| format!("failed to parse {}", url))
}

/// Scan one channel: the videos tab, then the streams tab when the page lists one.
pub async fn scan_channel(
    source: &dyn PageSource,
    channel: &Channel,
    delay: Duration,
    captured_at: DateTime<Utc>,
) -> Result<ChannelScan> {
    let page = fetch_page(source, &channel.videos_url()).await?;
    let mut scan = ChannelScan::new(channel.clone());
    scan.videos = to_items(channel, page.items.clone(), captured_at)
        .with_context(|| format!("bad publication time on {}", channel.videos_url()))?;
    scan.header = page.header.clone();

    if page.has_streams_tab() {
        tokio::time::sleep(delay).await;
        let streams = fetch_page(source, &channel.streams_url()).await?;
        scan.streams = to_items(channel, streams.items, captured_at)
            .with_context(|| format!("bad publication time on {}", channel.streams_url()))?;
    }
    Ok(scan)
}

/// Scan `channels` one at a time with `delay` between requests.
///
/// A channel that fails to fetch or parse is logged and left out of the result.
/// Cancellation is observed between channels only: the current channel always
/// completes, the pause after it is cut short.
#[instrument(skip_all, fields(channels = channels.len()))]
pub async fn scan_channels(
    source: &dyn PageSource,
    channels: &[Channel],
    delay: Duration,
    captured_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> ScanResult {
    let mut result = Vec::with_capacity(channels.len());
    for (i, channel) in channels.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(scanned = i, "scan interrupted by shutdown");
            break;
        }
        debug!("{}/{} {}", i + 1, channels.len(), format::fmt_channel(channel));
        match scan_channel(source, channel, delay, captured_at).await {
            Ok(scan) => result.push(scan),
            Err(err) => warn!(?err, url = %channel.url(), "scan failed; skipping channel"),
        }
        if i + 1 < channels.len() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    debug!(scanned = result.len(), "scan done");
    result
}
