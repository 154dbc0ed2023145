//! Run configuration assembled by outer surfaces (CLI, tests, embedders).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default maximum concurrent image downloads per page.
pub const DEFAULT_IMG_CONCURRENCY: usize = 10;

/// Default maximum concurrent page/post fetches.
pub const DEFAULT_LINK_CONCURRENCY: usize = 4;

/// Default output directory for downloaded pages and images.
pub const DEFAULT_OUTPUT_DIR: &str = "telegraph_images";

/// Configuration for one crawl run.
///
/// Carried explicitly into [`Scheduler::new`](crate::scheduler::Scheduler::new)
/// for the duration of the run; there is no process-wide mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Root directory that receives page markup and images.
    pub output_dir: PathBuf,
    /// Maximum concurrent image downloads per page/post being processed.
    pub img_concurrency: usize,
    /// Maximum concurrent page/post fetches.
    pub link_concurrency: usize,
    /// Walk entire channel histories instead of stopping after the newest
    /// post that yields targets.
    pub full_history: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            img_concurrency: DEFAULT_IMG_CONCURRENCY,
            link_concurrency: DEFAULT_LINK_CONCURRENCY,
            full_history: true,
        }
    }
}

impl CrawlConfig {
    /// Returns a copy with a different output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_limits() {
        let config = CrawlConfig::default();
        assert_eq!(config.img_concurrency, 10);
        assert_eq!(config.link_concurrency, 4);
        assert_eq!(config.output_dir, PathBuf::from("telegraph_images"));
        assert!(config.full_history);
    }

    #[test]
    fn test_with_output_dir_replaces_only_the_dir() {
        let config = CrawlConfig::default().with_output_dir("/tmp/crawl");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/crawl"));
        assert_eq!(config.img_concurrency, DEFAULT_IMG_CONCURRENCY);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = CrawlConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CrawlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.output_dir, config.output_dir);
        assert_eq!(back.link_concurrency, config.link_concurrency);
    }
}
