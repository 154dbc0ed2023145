//! CLI entry point for the telescrape binary.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use telescrape_core::{
    CrawlConfig, Database, HttpClient, Ledger, Scheduler, UnconfiguredSource,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Targets: positional args, else piped stdin (comma/whitespace separated)
    let raw = if args.targets.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        args.targets.join("\n")
    };
    let inputs: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if inputs.is_empty() {
        info!("No targets provided. Pass targets as arguments or pipe them on stdin.");
        info!("Example: telescrape https://telegra.ph/example-page-01-01");
        return Ok(());
    }

    info!(targets = inputs.len(), "telescrape starting");

    // The ledger is the dedup source of truth: failing to open it is fatal.
    let db = Database::new(&args.db).await?;
    let ledger = Ledger::new(db.clone());

    let config = CrawlConfig {
        output_dir: args.out.clone(),
        img_concurrency: usize::from(args.img_concurrency),
        link_concurrency: usize::from(args.link_concurrency),
        full_history: args.full,
    };
    let scheduler = Scheduler::new(config, HttpClient::new(), ledger)?;

    // An authenticated message-source session is an external collaborator;
    // without one, channel/post targets are reported and skipped.
    let outcome = scheduler.run(Arc::new(UnconfiguredSource), &inputs).await;

    // Close the pool on every exit path so the ledger is flushed.
    db.close().await;

    let summary = outcome?;
    info!(
        succeeded = summary.succeeded(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        "crawl finished"
    );

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "succeeded": summary.succeeded(),
                "skipped": summary.skipped(),
                "failed": summary.failed(),
            })
        );
    } else {
        println!(
            "succeeded: {}  skipped: {}  failed: {}",
            summary.succeeded(),
            summary.skipped(),
            summary.failed()
        );
    }
    if summary.failed() > 0 {
        warn!("some targets failed; re-run after fixing access or connectivity");
    }

    Ok(())
}
