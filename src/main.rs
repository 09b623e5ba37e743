use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tube_scanner::config;
use tube_scanner::db;
use tube_scanner::delivery::{self, DryRunSender, MessageSender};
use tube_scanner::handlers;
use tube_scanner::scheduler::{self, CycleRunner};
use tube_scanner::source::{HttpSource, PageSource};
use tube_scanner::telegram::TelegramSender;

#[derive(Debug, Parser)]
#[command(author, version, about)]
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

    let cancel = CancellationToken::new();
    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let source: Arc<dyn PageSource> = Arc::new(HttpSource::new(
        cfg.request_timeout(),
        cfg.scan.accept_language.clone(),
    )?);

    // Delivery worker (single task, drains one batch at a time)
    let sender: Box<dyn MessageSender> = if cfg.delivery.dry_run {
        info!("dry run: messages are logged, not sent");
        Box::new(DryRunSender)
    } else {
        Box::new(TelegramSender::new(bot.clone()))
    };
    let worker = {
        let pool = pool.clone();
        let settings = cfg.delivery_settings();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            delivery::run_worker(&pool, sender.as_ref(), &settings, &cancel).await;
        })
    };

    let runner = CycleRunner::new(
        pool.clone(),
        source.clone(),
        cfg.cycle_settings(),
        cancel.clone(),
    );
    let mut sched = scheduler::start(runner.clone(), &cfg.scan.cron).await?;

    let admin_ids = Arc::new(cfg.telegram.admin_ids.clone());
    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let pool = pool.clone();
        let source = source.clone();
        let admin_ids = admin_ids.clone();
        async move {
            if let Err(err) =
                handlers::handle_update(&bot, &pool, source.as_ref(), &admin_ids, &msg).await
            {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    info!("shutting down");
    cancel.cancel();
    if let Err(err) = sched.shutdown().await {
        error!(?err, "failed to stop scheduler");
    }
    runner.wait_idle().await;
    if let Err(err) = worker.await {
        error!(?err, "delivery worker panicked");
    }
    info!("bye");
    Ok(())
}
