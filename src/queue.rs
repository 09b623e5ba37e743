//! Durable FIFO of opaque delivery payloads, shared between the update cycle
//! (producer) and the delivery worker (consumer) through the SQLite file.
use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::{self, Pool};

/// Append payloads at the tail, all or nothing.
pub async fn push(pool: &Pool, payloads: &[Vec<u8>]) -> Result<()> {
    if payloads.is_empty() {
        return Ok(());
    }
    db::enqueue_payloads(pool, payloads).await
}

/// Take the head payload, if any.
pub async fn pop(pool: &Pool) -> Result<Option<Vec<u8>>> {
    db::take_next_payload(pool).await
}

/// Wait for the next payload, polling every `poll_interval` while the queue is
/// empty. Returns `None` once `cancel` fires.
pub async fn blocking_pop(
    pool: &Pool,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(payload) = pop(pool).await? {
            return Ok(Some(payload));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

pub async fn len(pool: &Pool) -> Result<i64> {
    db::count_queued(pool).await
}
