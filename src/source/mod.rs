//! Message-source collaborator contract and channel history walking.
//!
//! The authenticated session (entity resolution, history pagination, media
//! blobs) is an external collaborator. This module defines the seam the
//! scheduler depends on, plus [`ChannelWalk`], the cursor-driven lazy walk
//! over one channel's history.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Numeric channel identifier as exposed by the message source.
pub type ChannelId = i64;

/// Numeric post identifier within a channel.
pub type PostId = i64;

/// A resolved channel entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntity {
    /// Source-side identifier.
    pub id: ChannelId,
    /// Human-readable title, used in logs only.
    pub title: String,
}

/// Reference to a media blob attached to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Channel the post lives in.
    pub channel_id: ChannelId,
    /// Post carrying the blob.
    pub post_id: PostId,
    /// 1-based index of the blob within its post.
    pub index: u32,
    /// Filename suggested by the source, when it has one.
    pub filename_hint: Option<String>,
}

impl MediaRef {
    /// Scheme-qualified ledger key: `tg:<channel>:<post>:<index>`. Media has
    /// no stable URL, so the composite keeps the flat key space collision
    /// free.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("tg:{}:{}:{}", self.channel_id, self.post_id, self.index)
    }

    /// Destination filename: the source's hint, else index-based so re-runs
    /// produce identical paths.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.filename_hint
            .clone()
            .unwrap_or_else(|| format!("{}.jpg", self.index))
    }
}

/// One post record from a channel history.
#[derive(Debug, Clone)]
pub struct PostRecord {
    /// Channel the post belongs to.
    pub channel_id: ChannelId,
    /// Post identifier.
    pub id: PostId,
    /// Message text; embedded links are extracted from it during expansion.
    pub text: String,
    /// Attached media blob, if the post carries one.
    pub media: Option<MediaRef>,
}

/// Opaque continuation cursor into a channel's history.
///
/// Produced and consumed only by the source implementation; never persisted
/// across runs. Offsets are deliberately not part of this contract: they
/// drift when new posts arrive mid-walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor(pub u64);

/// One page of channel history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Posts on this page, newest first.
    pub posts: Vec<PostRecord>,
    /// Cursor for the next (older) page; `None` at the end of history.
    pub next: Option<HistoryCursor>,
}

/// Errors surfaced by the message-source collaborator.
///
/// All variants are skip-and-continue at the scheduler boundary; none is
/// retried automatically.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The handle/id does not resolve to a reachable entity.
    #[error("cannot resolve {target}: {reason}")]
    Resolution {
        /// What was being resolved.
        target: String,
        /// Source-supplied explanation.
        reason: String,
    },

    /// The session is not a member of, or is banned from, the target.
    #[error("access forbidden to {target}")]
    Forbidden {
        /// The inaccessible target.
        target: String,
    },

    /// Network-level failure talking to the source.
    #[error("message-source transport failure: {reason}")]
    Transport {
        /// Underlying failure description.
        reason: String,
    },
}

impl SourceError {
    /// Creates a resolution error.
    pub fn resolution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Creates a forbidden error.
    pub fn forbidden(target: impl Into<String>) -> Self {
        Self::Forbidden {
            target: target.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// Contract the crawl depends on. Implementations wrap an authenticated
/// session; tests script one in memory.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Resolves a channel handle (without the `@`) to an entity.
    async fn resolve_channel(&self, handle: &str) -> Result<ChannelEntity, SourceError>;

    /// Resolves a numeric channel id to an entity.
    async fn resolve_channel_id(&self, id: ChannelId) -> Result<ChannelEntity, SourceError>;

    /// Every channel/dialog visible to the session (backs the `all`
    /// sentinel).
    async fn list_channels(&self) -> Result<Vec<ChannelEntity>, SourceError>;

    /// Newest-first history page starting at `cursor` (`None` = newest).
    async fn history(
        &self,
        channel: &ChannelEntity,
        cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, SourceError>;

    /// One post by id; `Ok(None)` when it does not exist.
    async fn fetch_post(
        &self,
        channel_id: ChannelId,
        post_id: PostId,
    ) -> Result<Option<PostRecord>, SourceError>;

    /// Streams the media blob to `dest`, returning bytes written.
    async fn download_media(&self, media: &MediaRef, dest: &Path) -> Result<u64, SourceError>;
}

/// Lazy cursor-driven walk over a channel's history.
///
/// Always starts from the newest post: no cursor survives the run, so
/// resumption across runs relies solely on the ledger skipping recorded
/// keys.
pub struct ChannelWalk<'a> {
    source: &'a dyn MessageSource,
    channel: ChannelEntity,
    cursor: Option<HistoryCursor>,
    exhausted: bool,
}

impl<'a> ChannelWalk<'a> {
    /// Starts a walk from the newest post of `channel`.
    #[must_use]
    pub fn new(source: &'a dyn MessageSource, channel: ChannelEntity) -> Self {
        Self {
            source,
            channel,
            cursor: None,
            exhausted: false,
        }
    }

    /// Channel being walked.
    #[must_use]
    pub fn channel(&self) -> &ChannelEntity {
        &self.channel
    }

    /// Next batch of posts, or `None` once the history is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates source errors; the caller abandons this channel and
    /// continues with its siblings.
    pub async fn next_page(&mut self) -> Result<Option<Vec<PostRecord>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.source.history(&self.channel, self.cursor).await?;
        match page.next {
            Some(cursor) => self.cursor = Some(cursor),
            None => self.exhausted = true,
        }
        if page.posts.is_empty() && self.exhausted {
            return Ok(None);
        }
        Ok(Some(page.posts))
    }
}

/// Null collaborator used when no authenticated session is wired in.
///
/// Every operation fails with a resolution error, so message-source targets
/// are reported and skipped while document pages proceed normally.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSource;

const NO_SESSION: &str = "no message-source session configured";

#[async_trait]
impl MessageSource for UnconfiguredSource {
    async fn resolve_channel(&self, handle: &str) -> Result<ChannelEntity, SourceError> {
        Err(SourceError::resolution(handle, NO_SESSION))
    }

    async fn resolve_channel_id(&self, id: ChannelId) -> Result<ChannelEntity, SourceError> {
        Err(SourceError::resolution(id.to_string(), NO_SESSION))
    }

    async fn list_channels(&self) -> Result<Vec<ChannelEntity>, SourceError> {
        Err(SourceError::resolution("all", NO_SESSION))
    }

    async fn history(
        &self,
        channel: &ChannelEntity,
        _cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, SourceError> {
        Err(SourceError::resolution(&channel.title, NO_SESSION))
    }

    async fn fetch_post(
        &self,
        channel_id: ChannelId,
        post_id: PostId,
    ) -> Result<Option<PostRecord>, SourceError> {
        Err(SourceError::resolution(
            format!("{channel_id}/{post_id}"),
            NO_SESSION,
        ))
    }

    async fn download_media(&self, media: &MediaRef, _dest: &Path) -> Result<u64, SourceError> {
        Err(SourceError::resolution(media.dedup_key(), NO_SESSION))
    }
}
