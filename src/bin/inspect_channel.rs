use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tube_scanner::extract;
use tube_scanner::source::{HttpSource, PageSource};

/// Fetch a channel listing page and print what the extractor sees.
#[derive(Parser, Debug)]
struct Args {
    /// Channel page URL, e.g. https://www.youtube.com/@handle/videos
    url: String,

    #[arg(long, default_value = "en-US,en;q=0.9")]
    accept_language: String,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print only the channel header
    #[arg(long)]
    info: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let source = HttpSource::new(Duration::from_secs(args.timeout_secs), args.accept_language)?;
    let html = source.fetch(&args.url).await?;

    let json = if args.info {
        serde_json::to_string_pretty(&extract::parse_channel_info(&html)?)?
    } else {
        serde_json::to_string_pretty(&extract::parse_channel_page(&html)?)?
    };
    println!("{}", json);
    Ok(())
}
