use super::model::{DeadLetter, DestinationChannels};
use crate::extract::ChannelInfo;
use crate::model::{Channel, Destination, DestinationStatus, Item, LIVE_STYLE};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Forum-less destinations are stored with thread 0 so the (chat, thread) pair
/// stays unique.
const NO_THREAD: i64 = 0;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs, make sure the parent
/// directory exists and allow the file to be created. In-memory and
/// non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Without an explicit mode sqlx refuses to create a missing file.
    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}?mode=rwc", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn thread_to_db(thread_id: Option<i32>) -> i64 {
    thread_id.map(i64::from).unwrap_or(NO_THREAD)
}

fn thread_from_db(raw: i64) -> Option<i32> {
    if raw == NO_THREAD {
        None
    } else {
        i32::try_from(raw).ok()
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} out of range", secs))
}

fn channel_from_row(row: &SqliteRow) -> Channel {
    Channel {
        id: row.get("id"),
        original_id: row.get("original_id"),
        canonical_base_url: row.get("canonical_base_url"),
        title: row.get("title"),
    }
}

fn destination_from_row(row: &SqliteRow) -> Result<Destination> {
    let raw_status: i64 = row.get("status");
    let status = DestinationStatus::from_i64(raw_status)
        .ok_or_else(|| anyhow!("unknown destination status {}", raw_status))?;
    Ok(Destination {
        chat_id: row.get("chat_id"),
        thread_id: thread_from_db(row.get("thread_id")),
        title: row.get("title"),
        status,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    Ok(Item {
        original_id: row.get("original_id"),
        channel_id: row.get("channel_id"),
        title: row.get("title"),
        style: row.get("style"),
        time_ago: row.get("time_ago"),
        created_at: timestamp(row.get("created_at"))?,
        scanned_at: timestamp(row.get("scanned_at"))?,
        live_continuous: row.get("live_continuous"),
    })
}

// Channels

/// Insert a channel or refresh the title/url of the existing row.
#[instrument(skip_all)]
pub async fn upsert_channel(pool: &Pool, info: &ChannelInfo) -> Result<Channel> {
    let row = sqlx::query(
        "INSERT INTO channels (original_id, canonical_base_url, title) VALUES (?, ?, ?) \
         ON CONFLICT(original_id) DO UPDATE SET \
             title = excluded.title, \
             canonical_base_url = COALESCE(excluded.canonical_base_url, channels.canonical_base_url) \
         RETURNING id, original_id, canonical_base_url, title",
    )
    .bind(&info.channel_id)
    .bind(&info.canonical_base_url)
    .bind(&info.title)
    .fetch_one(pool)
    .await
    .context("failed to upsert channel")?;
    Ok(channel_from_row(&row))
}

#[instrument(skip_all)]
pub async fn find_channel(pool: &Pool, original_id: &str) -> Result<Option<Channel>> {
    let row = sqlx::query(
        "SELECT id, original_id, canonical_base_url, title FROM channels WHERE original_id = ?",
    )
    .bind(original_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(channel_from_row))
}

// Destinations

#[instrument(skip_all)]
pub async fn upsert_destination(
    pool: &Pool,
    chat_id: i64,
    thread_id: Option<i32>,
    title: Option<&str>,
) -> Result<Destination> {
    let row = sqlx::query(
        "INSERT INTO destinations (chat_id, thread_id, title, status) VALUES (?, ?, ?, ?) \
         ON CONFLICT(chat_id, thread_id) DO UPDATE SET title = COALESCE(excluded.title, destinations.title) \
         RETURNING chat_id, thread_id, title, status",
    )
    .bind(chat_id)
    .bind(thread_to_db(thread_id))
    .bind(title)
    .bind(DestinationStatus::On.as_i64())
    .fetch_one(pool)
    .await
    .context("failed to upsert destination")?;
    destination_from_row(&row)
}

#[instrument(skip_all)]
pub async fn get_destination(
    pool: &Pool,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Result<Option<Destination>> {
    let row = sqlx::query(
        "SELECT chat_id, thread_id, title, status FROM destinations WHERE chat_id = ? AND thread_id = ?",
    )
    .bind(chat_id)
    .bind(thread_to_db(thread_id))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(destination_from_row).transpose()
}

/// Returns `false` when the destination is unknown.
#[instrument(skip_all)]
pub async fn set_destination_status(
    pool: &Pool,
    chat_id: i64,
    thread_id: Option<i32>,
    status: DestinationStatus,
) -> Result<bool> {
    let res = sqlx::query("UPDATE destinations SET status = ? WHERE chat_id = ? AND thread_id = ?")
        .bind(status.as_i64())
        .bind(chat_id)
        .bind(thread_to_db(thread_id))
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

// Subscriptions

/// Returns `false` if the edge already existed or the destination is unknown.
#[instrument(skip_all)]
pub async fn add_subscription(
    pool: &Pool,
    channel_id: i64,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO subscriptions (channel_id, destination_id) \
         SELECT ?, id FROM destinations WHERE chat_id = ? AND thread_id = ?",
    )
    .bind(channel_id)
    .bind(chat_id)
    .bind(thread_to_db(thread_id))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn remove_subscription(
    pool: &Pool,
    channel_original_id: &str,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Result<bool> {
    let res = sqlx::query(
        "DELETE FROM subscriptions \
         WHERE channel_id = (SELECT id FROM channels WHERE original_id = ?) \
           AND destination_id = (SELECT id FROM destinations WHERE chat_id = ? AND thread_id = ?)",
    )
    .bind(channel_original_id)
    .bind(chat_id)
    .bind(thread_to_db(thread_id))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn destination_channels(
    pool: &Pool,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Result<Vec<Channel>> {
    let rows = sqlx::query(
        "SELECT c.id, c.original_id, c.canonical_base_url, c.title \
         FROM subscriptions s \
         JOIN channels c ON c.id = s.channel_id \
         JOIN destinations d ON d.id = s.destination_id \
         WHERE d.chat_id = ? AND d.thread_id = ? \
         ORDER BY c.title",
    )
    .bind(chat_id)
    .bind(thread_to_db(thread_id))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(channel_from_row).collect())
}

/// The fan-out graph: every ON destination with its subscribed channels, in
/// destination insertion order.
#[instrument(skip_all)]
pub async fn subscription_map(pool: &Pool) -> Result<Vec<DestinationChannels>> {
    let rows = sqlx::query(
        "SELECT d.id AS destination_id, d.chat_id, d.thread_id, d.title AS destination_title, d.status, \
                c.id, c.original_id, c.canonical_base_url, c.title \
         FROM subscriptions s \
         JOIN destinations d ON d.id = s.destination_id \
         JOIN channels c ON c.id = s.channel_id \
         WHERE d.status = ? \
         ORDER BY d.id, c.id",
    )
    .bind(DestinationStatus::On.as_i64())
    .fetch_all(pool)
    .await
    .context("failed to load subscriptions")?;

    let mut out: Vec<DestinationChannels> = Vec::new();
    let mut current: Option<i64> = None;
    for row in &rows {
        let destination_id: i64 = row.get("destination_id");
        if current != Some(destination_id) {
            let raw_status: i64 = row.get("status");
            out.push(DestinationChannels {
                destination: Destination {
                    chat_id: row.get("chat_id"),
                    thread_id: thread_from_db(row.get("thread_id")),
                    title: row.get("destination_title"),
                    status: DestinationStatus::from_i64(raw_status)
                        .ok_or_else(|| anyhow!("unknown destination status {}", raw_status))?,
                },
                channels: Vec::new(),
            });
            current = Some(destination_id);
        }
        if let Some(last) = out.last_mut() {
            last.channels.push(channel_from_row(row));
        }
    }
    Ok(out)
}

// Items

/// Ids of a channel's items created at or after `since`, plus every item flagged
/// as a continuous live stream.
#[instrument(skip_all)]
pub async fn last_item_ids(
    pool: &Pool,
    channel_id: i64,
    since: DateTime<Utc>,
) -> Result<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT original_id FROM items \
         WHERE channel_id = ? AND (created_at >= ? OR live_continuous = 1)",
    )
    .bind(channel_id)
    .bind(since.timestamp())
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

#[instrument(skip_all)]
pub async fn find_item(pool: &Pool, original_id: &str) -> Result<Option<Item>> {
    let row = sqlx::query(
        "SELECT original_id, channel_id, title, style, time_ago, created_at, scanned_at, live_continuous \
         FROM items WHERE original_id = ?",
    )
    .bind(original_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(item_from_row).transpose()
}

/// Mark the stored item as a continuous live stream when either the stored or
/// the observed style is LIVE. Single statement; returns whether a row changed,
/// so an item that is already promoted reports `false`.
#[instrument(skip_all)]
pub async fn promote_to_live(
    pool: &Pool,
    original_id: &str,
    observed_style: Option<&str>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE items SET style = ?1, live_continuous = 1 \
         WHERE original_id = ?2 AND (style = ?1 OR ?3 = ?1) \
           AND NOT (style IS ?1 AND live_continuous = 1)",
    )
    .bind(LIVE_STYLE)
    .bind(original_id)
    .bind(observed_style)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Insert items, skipping ids that are already stored. Returns the number of
/// rows inserted.
#[instrument(skip_all)]
pub async fn save_items(pool: &Pool, items: &[Item]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for item in items {
        let res = sqlx::query(
            "INSERT INTO items \
                (original_id, channel_id, title, style, time_ago, created_at, scanned_at, live_continuous) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(original_id) DO NOTHING",
        )
        .bind(&item.original_id)
        .bind(item.channel_id)
        .bind(&item.title)
        .bind(&item.style)
        .bind(&item.time_ago)
        .bind(item.created_at.timestamp())
        .bind(item.scanned_at.timestamp())
        .bind(item.live_continuous)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to save item {}", item.original_id))?;
        inserted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

// Delivery queue

#[instrument(skip_all)]
pub async fn enqueue_payloads(pool: &Pool, payloads: &[Vec<u8>]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for payload in payloads {
        sqlx::query("INSERT INTO delivery_queue (payload) VALUES (?)")
            .bind(payload.as_slice())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Remove and return the oldest payload in one statement.
#[instrument(skip_all)]
pub async fn take_next_payload(pool: &Pool) -> Result<Option<Vec<u8>>> {
    let payload: Option<Vec<u8>> = sqlx::query_scalar(
        "DELETE FROM delivery_queue \
         WHERE id = (SELECT MIN(id) FROM delivery_queue) \
         RETURNING payload",
    )
    .fetch_optional(pool)
    .await?;
    Ok(payload)
}

#[instrument(skip_all)]
pub async fn count_queued(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// Dead letters

#[instrument(skip_all)]
pub async fn insert_dead_letter(
    pool: &Pool,
    destination: Option<&Destination>,
    item_original_id: Option<&str>,
    payload: &[u8],
    reason: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO dead_letters (chat_id, thread_id, item_original_id, payload, reason) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(destination.map(|d| d.chat_id))
    .bind(destination.and_then(|d| d.thread_id))
    .bind(item_original_id)
    .bind(payload)
    .bind(reason)
    .fetch_one(pool)
    .await
    .context("failed to store dead letter")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn list_dead_letters(pool: &Pool) -> Result<Vec<DeadLetter>> {
    let rows = sqlx::query(
        "SELECT id, chat_id, thread_id, item_original_id, payload, reason FROM dead_letters ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| DeadLetter {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            thread_id: row.get("thread_id"),
            item_original_id: row.get("item_original_id"),
            payload: row.get("payload"),
            reason: row.get("reason"),
        })
        .collect())
}
