//! The scan/update cycle: scan subscribed channels, keep only what is new,
//! fan it out to the delivery queue and remember it as seen.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::fanout;
use crate::format;
use crate::model::{Channel, ChannelScan, Item, ScanResult, LIVE_STYLE};
use crate::queue;
use crate::scanner;
use crate::source::PageSource;

#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Pause between page requests.
    pub request_delay: Duration,
    /// Items older than this are never considered new.
    pub page_window: chrono::Duration,
    /// How far back stored ids count as already seen.
    pub lookback: chrono::Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub channels: usize,
    pub scanned: usize,
    pub new_items: usize,
    pub batches: usize,
    pub saved: u64,
}

/// Drop items created before `now - window`.
pub fn filter_by_time(scans: ScanResult, now: DateTime<Utc>, window: chrono::Duration) -> ScanResult {
    let threshold = now - window;
    scans
        .into_iter()
        .map(|mut scan| {
            scan.videos.retain(|i| i.created_at >= threshold);
            scan.streams.retain(|i| i.created_at >= threshold);
            scan
        })
        .collect()
}

/// Resolve a scanned stream against the stored record with the same id.
///
/// A stream is new only when nothing is stored under its id. When either side
/// is LIVE the stored record is promoted to a continuous live stream in place.
async fn is_new_stream(pool: &Pool, item: &Item) -> Result<bool> {
    let Some(stored) = db::find_item(pool, &item.original_id).await? else {
        return Ok(true);
    };
    if stored.is_live() || item.is_live() {
        if db::promote_to_live(pool, &item.original_id, item.style.as_deref()).await? {
            info!(id = %item.original_id, "stream promoted to {}", LIVE_STYLE);
        }
    } else if stored.style != item.style {
        warn!(
            id = %item.original_id,
            stored = ?stored.style,
            scanned = ?item.style,
            "stream style conflict; keeping stored record"
        );
    }
    Ok(false)
}

/// Keep only items that were never seen before. Ids in the channel's lookback
/// set are plain duplicates; streams outside it are checked against the whole
/// table. An id accepted once in this call is not accepted again, even from
/// another tab or channel.
#[instrument(skip_all)]
pub async fn filter_by_id(
    pool: &Pool,
    scans: ScanResult,
    now: DateTime<Utc>,
    lookback: chrono::Duration,
) -> Result<ScanResult> {
    let since = now - lookback;
    let mut accepted: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(scans.len());

    for scan in scans {
        if scan.is_empty() {
            continue;
        }
        let seen = db::last_item_ids(pool, scan.channel.id, since)
            .await
            .with_context(|| format!("failed to load history of {}", scan.channel.original_id))?;

        let mut fresh = ChannelScan::new(scan.channel);
        fresh.header = scan.header;
        for item in scan.videos {
            if !seen.contains(&item.original_id) && accepted.insert(item.original_id.clone()) {
                fresh.videos.push(item);
            }
        }
        for item in scan.streams {
            if seen.contains(&item.original_id) || accepted.contains(&item.original_id) {
                continue;
            }
            if is_new_stream(pool, &item).await? {
                accepted.insert(item.original_id.clone());
                fresh.streams.push(item);
            }
        }
        if !fresh.is_empty() {
            out.push(fresh);
        }
    }
    Ok(out)
}

/// Apply the channel headers seen during the scan to the stored channels.
/// Failures only cost the refresh.
async fn refresh_channels(pool: &Pool, scans: &mut [ChannelScan]) {
    for scan in scans.iter_mut() {
        let Some(header) = scan.header.as_ref() else {
            continue;
        };
        if header.channel_id != scan.channel.original_id {
            warn!(
                expected = %scan.channel.original_id,
                found = %header.channel_id,
                "channel header does not match; not refreshing"
            );
            continue;
        }
        match db::upsert_channel(pool, header).await {
            Ok(channel) => scan.channel = channel,
            Err(err) => warn!(?err, "failed to refresh {}", format::fmt_channel(&scan.channel)),
        }
    }
}

fn distinct_channels(subscriptions: &[db::DestinationChannels]) -> Vec<Channel> {
    let mut seen = HashSet::new();
    subscriptions
        .iter()
        .flat_map(|s| s.channels.iter())
        .filter(|c| seen.insert(c.id))
        .cloned()
        .collect()
}

/// Run one full cycle at `now`.
///
/// New items are remembered only after their batches are queued: a queue
/// failure aborts the cycle and the items stay new for the next one. A failure
/// to remember them after queueing is logged and may cause a re-send.
#[instrument(skip_all)]
pub async fn run_cycle(
    pool: &Pool,
    source: &dyn PageSource,
    settings: &CycleSettings,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<CycleReport> {
    let subscriptions = db::subscription_map(pool).await?;
    let channels = distinct_channels(&subscriptions);
    let mut report = CycleReport {
        channels: channels.len(),
        ..CycleReport::default()
    };
    if channels.is_empty() {
        debug!("no subscribed channels");
        return Ok(report);
    }

    let mut scans =
        scanner::scan_channels(source, &channels, settings.request_delay, now, cancel).await;
    report.scanned = scans.len();
    refresh_channels(pool, &mut scans).await;

    let recent = filter_by_time(scans, now, settings.page_window);
    let fresh = filter_by_id(pool, recent, now, settings.lookback).await?;
    let new_items: Vec<Item> = fresh.iter().flat_map(|s| s.items().cloned()).collect();
    report.new_items = new_items.len();
    if new_items.is_empty() {
        info!(scanned = report.scanned, "nothing new");
        return Ok(report);
    }
    debug!("new items:\n{}", format::fmt_scan(&fresh));

    let batches = fanout::build_batches(&fresh, &subscriptions);
    report.batches = batches.len();
    let payloads = batches
        .iter()
        .map(|b| b.encode())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to encode delivery batch")?;
    queue::push(pool, &payloads)
        .await
        .context("failed to queue delivery batches")?;
    debug!("queued:\n{}", format::fmt_batches(&batches));

    match db::save_items(pool, &new_items).await {
        Ok(saved) => report.saved = saved,
        Err(err) => error!(?err, items = new_items.len(), "failed to save delivered items"),
    }

    info!(
        scanned = report.scanned,
        new = report.new_items,
        batches = report.batches,
        "cycle finished"
    );
    Ok(report)
}
