//! Classified crawl targets. Immutable once classified.

use std::fmt;

/// Hosting domain of a document page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageHost {
    /// `telegra.ph`
    Telegraph,
    /// `graph.org`
    Graph,
}

impl PageHost {
    /// Base URL used for canonicalization and to resolve root-relative
    /// image sources.
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Telegraph => "https://telegra.ph",
            Self::Graph => "https://graph.org",
        }
    }
}

/// A document page hosting zero or more embedded images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    /// Canonical `https://` URL of the page; also its ledger key.
    pub url: String,
    /// Hosting domain.
    pub host: PageHost,
    /// Path slug, doubling as the output directory name.
    pub slug: String,
}

impl PageTarget {
    pub(crate) fn new(host: PageHost, slug: &str) -> Self {
        Self {
            url: format!("{}/{slug}", host.base_url()),
            host,
            slug: slug.to_string(),
        }
    }

    /// Page-level dedup key.
    #[must_use]
    pub fn dedup_key(&self) -> &str {
        &self.url
    }
}

/// A single post within a message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostTarget {
    /// Numeric channel identifier.
    pub channel_id: i64,
    /// Numeric post identifier within the channel.
    pub post_id: i64,
}

impl PostTarget {
    /// Canonical link form; also the post-level ledger key.
    #[must_use]
    pub fn canonical_url(&self) -> String {
        format!("https://t.me/c/{}/{}", self.channel_id, self.post_id)
    }

    /// Output directory name for this post's media.
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("tg_{}_{}", self.channel_id, self.post_id)
    }
}

/// A message channel to expand into post targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    /// `@handle` or bare username.
    Handle(String),
    /// Every channel/dialog visible to the authenticated session.
    All,
}

/// A classified reference to crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Document page carrying embedded images.
    Page(PageTarget),
    /// Single message post, possibly carrying media.
    Post(PostTarget),
    /// Channel whose history expands into further targets.
    Channel(ChannelTarget),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(page) => write!(f, "{}", page.url),
            Self::Post(post) => write!(f, "{}", post.canonical_url()),
            Self::Channel(ChannelTarget::Handle(handle)) => write!(f, "@{handle}"),
            Self::Channel(ChannelTarget::All) => write!(f, "all"),
        }
    }
}
