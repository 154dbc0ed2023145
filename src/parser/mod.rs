//! Input classification for crawl targets.
//!
//! Pure string parsing: no I/O, no side effects. Inputs tolerate surrounding
//! whitespace and an optional `http(s)://` scheme.

mod error;
mod target;
mod text;

pub use error::ClassifyError;
pub use target::{ChannelTarget, PageHost, PageTarget, PostTarget, Target};
pub use text::extract_targets;

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

/// Matches a Telegraph page URL or bare `telegra.ph/<slug>` form.
#[allow(clippy::expect_used)]
static TELEGRAPH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?telegra\.ph/([\w-]+)/?$").expect("telegraph regex is valid")
});

/// Matches a Graph page URL or bare `graph.org/<slug>` form.
#[allow(clippy::expect_used)]
static GRAPH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?graph\.org/([\w-]+)/?$").expect("graph regex is valid")
});

/// Matches a `t.me/c/<channel>/<post>` message link.
#[allow(clippy::expect_used)]
static POST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?t\.me/c/(\d+)/(\d+)/?$").expect("post regex is valid")
});

/// Matches a bare channel username (platform rules: letter first, then
/// letters/digits/underscores, at least five characters total).
#[allow(clippy::expect_used)]
static BARE_HANDLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{4,31}$").expect("handle regex is valid"));

/// Classifies one input string into a crawl target.
///
/// Recognized forms:
/// - `telegra.ph/<slug>` / `graph.org/<slug>` page URLs
/// - `t.me/c/<channel-id>/<post-id>` message links
/// - `@handle`, bare usernames, and the `all` sentinel
///
/// # Errors
///
/// Returns [`ClassifyError::Unrecognized`] for anything else; the caller
/// logs and skips such inputs.
pub fn classify(input: &str) -> Result<Target, ClassifyError> {
    let trimmed = input.trim();
    trace!(input = %trimmed, "classifying target");

    if let Some(caps) = TELEGRAPH_PATTERN.captures(trimmed) {
        return Ok(Target::Page(PageTarget::new(PageHost::Telegraph, &caps[1])));
    }
    if let Some(caps) = GRAPH_PATTERN.captures(trimmed) {
        return Ok(Target::Page(PageTarget::new(PageHost::Graph, &caps[1])));
    }
    if let Some(caps) = POST_PATTERN.captures(trimmed) {
        let channel_id = caps[1]
            .parse()
            .map_err(|_| ClassifyError::unrecognized(trimmed))?;
        let post_id = caps[2]
            .parse()
            .map_err(|_| ClassifyError::unrecognized(trimmed))?;
        return Ok(Target::Post(PostTarget {
            channel_id,
            post_id,
        }));
    }
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(Target::Channel(ChannelTarget::All));
    }
    if let Some(handle) = trimmed.strip_prefix('@') {
        if !handle.is_empty()
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Ok(Target::Channel(ChannelTarget::Handle(handle.to_string())));
        }
        return Err(ClassifyError::unrecognized(trimmed));
    }
    if BARE_HANDLE_PATTERN.is_match(trimmed) {
        return Ok(Target::Channel(ChannelTarget::Handle(trimmed.to_string())));
    }

    Err(ClassifyError::unrecognized(trimmed))
}
