//! Delivery worker: drains the queue one batch at a time and sends every entry
//! with bounded retry on throttling.
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::format;
use crate::model::{DeliveryBatch, DeliveryEntry, Destination};
use crate::queue;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("throttled, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, destination: &Destination, html: &str) -> Result<(), SendError>;
}

/// Sender used with `delivery.dry_run`: logs what would be sent.
#[derive(Debug, Clone, Default)]
pub struct DryRunSender;

#[async_trait]
impl MessageSender for DryRunSender {
    async fn send_message(&self, destination: &Destination, html: &str) -> Result<(), SendError> {
        info!("dry run ==> {}\n{}", format::fmt_destination(destination), html);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Send attempts per entry while the platform keeps throttling.
    pub attempt_count: u32,
    /// Used when a throttle response carries no usable wait time.
    pub throttle_fallback: Duration,
    /// Pause after a network failure before the next entry.
    pub error_delay: Duration,
    /// Pause between consecutive entries of a batch.
    pub message_delay: Duration,
    /// Pause after every drained batch.
    pub batch_delay: Duration,
    /// Queue poll interval while it is empty.
    pub poll_interval: Duration,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub delivered: usize,
    pub requeued: Vec<DeliveryEntry>,
    pub dead_lettered: usize,
}

enum EntryFate {
    Delivered,
    Transient(String),
    Dead(String),
}

async fn send_entry(
    sender: &dyn MessageSender,
    entry: &DeliveryEntry,
    settings: &DeliverySettings,
) -> EntryFate {
    let text = format::fmt_message(entry);
    let attempts = settings.attempt_count.max(1);
    for attempt in 1..=attempts {
        match sender.send_message(&entry.destination, &text).await {
            Ok(()) => return EntryFate::Delivered,
            Err(SendError::RetryAfter(wait)) => {
                if attempt == attempts {
                    break;
                }
                let wait = if wait.is_zero() {
                    settings.throttle_fallback
                } else {
                    wait
                };
                warn!(attempt, ?wait, "throttled; {}", format::fmt_pair(&entry.item, &entry.destination));
                tokio::time::sleep(wait).await;
            }
            Err(SendError::Network(msg)) => return EntryFate::Transient(msg),
            Err(SendError::Rejected(msg)) => return EntryFate::Dead(format!("rejected: {}", msg)),
        }
    }
    EntryFate::Dead(format!("still throttled after {} attempts", attempts))
}

async fn dead_letter(pool: &Pool, entry: &DeliveryEntry, reason: &str) {
    error!(reason, "dropping {}", format::fmt_pair(&entry.item, &entry.destination));
    let payload = match serde_json::to_vec(entry) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, "failed to encode dead letter");
            Vec::new()
        }
    };
    if let Err(err) = db::insert_dead_letter(
        pool,
        Some(&entry.destination),
        Some(&entry.item.original_id),
        &payload,
        reason,
    )
    .await
    {
        error!(?err, "failed to store dead letter");
    }
}

/// Send every entry of `batch`. Entries that hit a network error are pushed
/// back to the queue tail as one new batch.
#[instrument(skip_all, fields(entries = batch.len()))]
pub async fn deliver_batch(
    pool: &Pool,
    sender: &dyn MessageSender,
    batch: DeliveryBatch,
    settings: &DeliverySettings,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for (i, entry) in batch.entries.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(settings.message_delay).await;
        }
        match send_entry(sender, &entry, settings).await {
            EntryFate::Delivered => {
                debug!("sent {}", format::fmt_pair(&entry.item, &entry.destination));
                outcome.delivered += 1;
            }
            EntryFate::Transient(msg) => {
                warn!(error = %msg, "send failed; {}", format::fmt_pair(&entry.item, &entry.destination));
                outcome.requeued.push(entry);
                tokio::time::sleep(settings.error_delay).await;
            }
            EntryFate::Dead(reason) => {
                dead_letter(pool, &entry, &reason).await;
                outcome.dead_lettered += 1;
            }
        }
    }

    if !outcome.requeued.is_empty() {
        let retry = DeliveryBatch::new(outcome.requeued.clone());
        let pushed = match retry.encode() {
            Ok(payload) => queue::push(pool, &[payload]).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = pushed {
            for entry in &retry.entries {
                error!("lost on requeue: {}", format::fmt_pair(&entry.item, &entry.destination));
            }
            return Err(err.context("failed to requeue failed entries"));
        }
        info!(entries = retry.len(), "requeued failed entries");
    }
    Ok(outcome)
}

/// Decode and deliver one queued payload. Undecodable payloads are dead-lettered.
pub async fn handle_payload(
    pool: &Pool,
    sender: &dyn MessageSender,
    payload: &[u8],
    settings: &DeliverySettings,
) -> Result<BatchOutcome> {
    match DeliveryBatch::decode(payload) {
        Ok(batch) => deliver_batch(pool, sender, batch, settings).await,
        Err(err) => {
            error!(?err, "undecodable batch payload");
            db::insert_dead_letter(pool, None, None, payload, &format!("undecodable: {}", err))
                .await?;
            Ok(BatchOutcome {
                dead_lettered: 1,
                ..BatchOutcome::default()
            })
        }
    }
}

/// Drain the queue until `cancel` fires. A batch in progress always completes.
pub async fn run_worker(
    pool: &Pool,
    sender: &dyn MessageSender,
    settings: &DeliverySettings,
    cancel: &CancellationToken,
) {
    info!("delivery worker started");
    while !cancel.is_cancelled() {
        let payload = match queue::blocking_pop(pool, settings.poll_interval, cancel).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(err) => {
                error!(?err, "queue read failed");
                tokio::time::sleep(settings.poll_interval.max(Duration::from_secs(1))).await;
                continue;
            }
        };
        match handle_payload(pool, sender, &payload, settings).await {
            Ok(outcome) => debug!(
                delivered = outcome.delivered,
                requeued = outcome.requeued.len(),
                dead = outcome.dead_lettered,
                "batch done"
            ),
            Err(err) => error!(?err, "batch delivery failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.batch_delay) => {}
        }
    }
    info!("delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationStatus, Item};
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSender {
        responses: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl RecordingSender {
        fn with(responses: Vec<Result<(), SendError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_message(&self, _: &Destination, _: &str) -> Result<(), SendError> {
            *self.calls.lock().await += 1;
            self.responses.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    fn settings() -> DeliverySettings {
        DeliverySettings {
            attempt_count: 3,
            throttle_fallback: Duration::from_secs(1),
            error_delay: Duration::from_secs(65),
            message_delay: Duration::from_secs(1),
            batch_delay: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }

    fn entry(id: &str) -> DeliveryEntry {
        DeliveryEntry {
            destination: Destination {
                chat_id: 42,
                thread_id: None,
                title: None,
                status: DestinationStatus::On,
            },
            item: Item {
                original_id: id.into(),
                channel_id: 1,
                title: id.into(),
                style: None,
                time_ago: None,
                created_at: Utc::now(),
                scanned_at: Utc::now(),
                live_continuous: false,
            },
            channel_title: "Chan".into(),
        }
    }

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test(start_paused = true)]
    async fn zero_wait_uses_fallback() {
        let sender = RecordingSender::with(vec![Err(SendError::RetryAfter(Duration::ZERO))]);
        let start = tokio::time::Instant::now();
        let fate = send_entry(&sender, &entry("a"), &settings()).await;
        assert!(matches!(fate, EntryFate::Delivered));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    /// Paused-clock tests must not touch the database: the pool's acquire
    /// timeout would fire while the clock auto-advances.
    fn lazy_pool() -> Pool {
        SqlitePoolOptions::new().connect_lazy("sqlite::memory:").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn message_delay_only_between_entries() {
        let pool = lazy_pool();
        let sender = RecordingSender::default();
        let start = tokio::time::Instant::now();
        let batch = DeliveryBatch::new(vec![entry("a"), entry("b"), entry("c")]);
        let outcome = deliver_batch(&pool, &sender, batch, &settings()).await.unwrap();
        assert_eq!(outcome.delivered, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn requeue_failure_is_an_error() {
        // no migrations: the queue table is missing
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let sender = RecordingSender::with(vec![Err(SendError::Network("reset".into()))]);
        let settings = DeliverySettings {
            error_delay: Duration::ZERO,
            ..settings()
        };
        let err = deliver_batch(&pool, &sender, DeliveryBatch::new(vec![entry("a")]), &settings)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to requeue"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_dead_lettered() {
        let pool = setup_pool().await;
        let sender = RecordingSender::default();
        let outcome = handle_payload(&pool, &sender, b"not json", &settings())
            .await
            .unwrap();
        assert_eq!(outcome.dead_lettered, 1);
        assert_eq!(*sender.calls.lock().await, 0);
        let dead = db::list_dead_letters(&pool).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"not json".to_vec());
        assert!(dead[0].reason.starts_with("undecodable"));
    }
}
