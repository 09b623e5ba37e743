use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tube_scanner::config;
use tube_scanner::db;
use tube_scanner::queue;
use tube_scanner::source::HttpSource;
use tube_scanner::update;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one scan/update cycle against the configured database and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let source = HttpSource::new(cfg.request_timeout(), cfg.scan.accept_language.clone())?;
    let cancel = CancellationToken::new();
    let report = update::run_cycle(&pool, &source, &cfg.cycle_settings(), Utc::now(), &cancel).await?;

    info!(
        channels = report.channels,
        scanned = report.scanned,
        new = report.new_items,
        batches = report.batches,
        saved = report.saved,
        queued = queue::len(&pool).await?,
        "cycle complete"
    );
    Ok(())
}
