//! # Case Tab Harvester
//!
//! A background service for case/work-order pages. Pages send tagged JSON
//! requests; for item fetches the harvester opens one short-lived background
//! tab per note or email, scrapes it through an injected extractor, normalizes
//! the result into a unified record and replies with every record keyed by
//! item URL.
//!
//! ## Usage
//!
//! ```sh
//! case_tab_harvester -i requests.jsonl -o replies.jsonl
//! ```
//!
//! ## Architecture
//!
//! The harvester is a small pipeline:
//! 1. **Routing**: [`router`] turns each message into a request and dispatches it
//! 2. **Pooling**: [`pool`] runs a batch over a fixed number of workers (4 by default)
//! 3. **Scraping**: [`executor`] drives one tab from open to close with load and
//!    result timeouts, using [`dates`] to normalize item dates
//! 4. **Browser**: [`browser`] abstracts tabs and their events; the bundled
//!    backend emulates tabs over HTTP

use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod browser;
mod cli;
mod config;
mod dates;
mod executor;
mod extract;
mod models;
mod pool;
mod router;
mod utils;

use browser::http::HttpBrowser;
use cli::Cli;
use config::HarvestConfig;
use models::PageMessage;
use pool::ConcurrencyPool;
use router::{Request, RequestRouter, Sender};
use utils::{ensure_writable_dir, truncate_for_log};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("case_tab_harvester starting up");

    let args = Cli::parse();
    debug!(?args.input, ?args.config, ?args.output, "Parsed CLI arguments");

    // ---- Configuration ----
    let mut config = match &args.config {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(views_dir) = &args.views_dir {
        config.views_dir = views_dir.clone();
    }
    config.validate()?;

    // Early check: rendered views must be writable
    ensure_writable_dir(&config.views_dir).await?;

    // ---- Browser and router ----
    let browser = HttpBrowser::new(&config)?;
    let (page, mut page_messages) = browser.register_page();
    tokio::spawn(async move {
        while let Some(message) = page_messages.recv().await {
            match message {
                PageMessage::LogUrlProcessing {
                    item_type,
                    index,
                    total,
                } => info!(%item_type, index, total, "Page: processing item"),
                PageMessage::GenerateFullView => info!("Page: generate full view requested"),
            }
        }
    });

    let pool = ConcurrencyPool::new(config.concurrency, config.timeouts());
    let router = RequestRouter::new(browser, pool);
    let sender = Sender { tab: Some(page) };

    // ---- Request loop ----
    let input: Box<dyn tokio::io::AsyncRead + Unpin> = if args.input == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&args.input).await?)
    };
    let mut output: Box<dyn AsyncWrite + Unpin> = match &args.output {
        Some(path) => Box::new(File::create(path).await?),
        None => Box::new(io::stdout()),
    };

    let mut lines = BufReader::new(input).lines();
    let mut handled = 0usize;
    let mut replies = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, line = %truncate_for_log(line, 120), "Skipping malformed request line");
                continue;
            }
        };

        handled += 1;
        if let Some(reply) = router.handle(Request::from_value(value), sender).await {
            let mut json = serde_json::to_string(&reply)?;
            json.push('\n');
            output.write_all(json.as_bytes()).await?;
            output.flush().await?;
            replies += 1;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        handled,
        replies,
        open_tabs = router.browser().open_tab_count(),
        "Execution complete"
    );
    Ok(())
}
