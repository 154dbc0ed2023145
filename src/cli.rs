//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use telescrape_core::{DEFAULT_IMG_CONCURRENCY, DEFAULT_LINK_CONCURRENCY};

/// Download images from article pages and message-channel posts.
///
/// Targets are telegra.ph/graph.org page URLs, t.me/c post links, @channel
/// handles, or the literal `all`. Every image is downloaded at most once
/// across runs; processed keys live in a local SQLite ledger.
#[derive(Parser, Debug)]
#[command(name = "telescrape")]
#[command(author, version, about)]
pub struct Args {
    /// Targets to crawl (also accepted comma/whitespace separated on stdin)
    pub targets: Vec<String>,

    /// Directory that receives page markup and images
    #[arg(short, long, default_value = "telegraph_images")]
    pub out: PathBuf,

    /// Path of the dedup ledger database
    #[arg(long, default_value = "processed_links.db")]
    pub db: PathBuf,

    /// Maximum concurrent image downloads per page (1-100)
    #[arg(short = 'i', long, default_value_t = DEFAULT_IMG_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub img_concurrency: u8,

    /// Maximum concurrent page/post fetches (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_LINK_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub link_concurrency: u8,

    /// Walk entire channel histories instead of stopping at the newest match
    #[arg(short = 'f', long)]
    pub full: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
