//! Embedded-link extraction from message text.
//!
//! Channel expansion turns history posts into leaf targets by scanning the
//! post text for page and post links.

use std::sync::LazyLock;

use regex::Regex;

use super::{Target, classify};

/// One pass over the text keeps discovery in order of appearance.
#[allow(clippy::expect_used)]
static LINK_SCAN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:telegra\.ph/[\w-]+|graph\.org/[\w-]+|t\.me/c/\d+/\d+)")
        .expect("link scan regex is valid")
});

/// Extracts page and post targets embedded in free-form post text, in order
/// of appearance. Matches that fail classification are dropped.
#[must_use]
pub fn extract_targets(text: &str) -> Vec<Target> {
    LINK_SCAN_PATTERN
        .find_iter(text)
        .filter_map(|m| classify(m.as_str()).ok())
        .collect()
}
