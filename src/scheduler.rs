//! Cron trigger for the update cycle.
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::Pool;
use crate::source::PageSource;
use crate::update::{self, CycleReport, CycleSettings};

/// Accept classic 5-field crontabs by pinning the seconds field to 0.
pub fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Runs update cycles one at a time.
#[derive(Clone)]
pub struct CycleRunner {
    pool: Pool,
    source: Arc<dyn PageSource>,
    settings: CycleSettings,
    running: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl CycleRunner {
    pub fn new(
        pool: Pool,
        source: Arc<dyn PageSource>,
        settings: CycleSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            source,
            settings,
            running: Arc::new(Mutex::new(())),
            cancel,
        }
    }

    /// Run a cycle unless one is already in flight. Returns `None` when skipped
    /// or when shutdown has begun.
    pub async fn run_once(&self) -> Option<CycleReport> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let Ok(_guard) = self.running.try_lock() else {
            warn!("previous cycle still running; skipping this trigger");
            return None;
        };
        match update::run_cycle(
            &self.pool,
            self.source.as_ref(),
            &self.settings,
            Utc::now(),
            &self.cancel,
        )
        .await
        {
            Ok(report) => Some(report),
            Err(err) => {
                error!(?err, "update cycle failed");
                None
            }
        }
    }

    /// Wait for the cycle in flight, if any.
    pub async fn wait_idle(&self) {
        let _guard = self.running.lock().await;
    }
}

/// Build and start the scheduler. The caller owns shutdown.
pub async fn start(runner: CycleRunner, cron: &str) -> Result<JobScheduler> {
    let cron = normalize_cron(cron);
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let runner = runner.clone();
        Box::pin(async move {
            runner.run_once().await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(%cron, "scheduler started (UTC)");
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    struct NoPages;

    #[async_trait]
    impl PageSource for NoPages {
        async fn fetch(&self, url: &str) -> Result<String> {
            anyhow::bail!("unexpected fetch of {url}")
        }
    }

    async fn runner(cancel: CancellationToken) -> CycleRunner {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let settings = CycleSettings {
            request_delay: std::time::Duration::ZERO,
            page_window: chrono::Duration::days(2),
            lookback: chrono::Duration::days(30),
        };
        CycleRunner::new(pool, Arc::new(NoPages), settings, cancel)
    }

    #[test]
    fn five_field_crontab_gets_seconds() {
        assert_eq!(normalize_cron("*/30 * * * *"), "0 */30 * * * *");
        assert_eq!(normalize_cron("  5 */30 * * * * "), "5 */30 * * * *");
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let runner = runner(CancellationToken::new()).await;
        let guard = runner.running.lock().await;
        assert_eq!(runner.run_once().await, None);
        drop(guard);
        assert_eq!(runner.run_once().await, Some(CycleReport::default()));
    }

    #[tokio::test]
    async fn no_cycle_after_shutdown() {
        let cancel = CancellationToken::new();
        let runner = runner(cancel.clone()).await;
        cancel.cancel();
        assert_eq!(runner.run_once().await, None);
    }
}
