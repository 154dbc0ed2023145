//! Image download with ledger-backed at-most-once semantics.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::client::HttpClient;
use super::error::FetchError;
use crate::ledger::{Ledger, LedgerError, LedgerKind};
use crate::source::{MediaRef, MessageSource, SourceError};

/// A discovered image to download.
///
/// Ephemeral: produced by a fetcher and consumed immediately by the
/// scheduler; nothing beyond the ledger key it generates is persisted.
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Image URL found on a document page; `ordinal` is its 1-based
    /// position in document order.
    Url {
        /// Resolved absolute URL.
        url: String,
        /// 1-based position on the page.
        ordinal: usize,
    },
    /// Media blob attached to a message post.
    Media(MediaRef),
}

impl ImageRef {
    /// Ledger key for this image. URLs key on their canonical form; media
    /// uses the scheme-qualified composite `tg:<channel>:<post>:<index>` so
    /// the flat key space cannot collide.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Url { url, .. } => url.clone(),
            Self::Media(media) => media.dedup_key(),
        }
    }

    fn ledger_kind(&self) -> LedgerKind {
        match self {
            Self::Url { .. } => LedgerKind::Image,
            Self::Media(_) => LedgerKind::Media,
        }
    }

    /// Destination filename. Deterministic so re-runs reproduce identical
    /// paths: the ordinal plus the source extension (`jpg` fallback).
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::Url { url, ordinal } => format!("{ordinal}.{}", extension_of(url)),
            Self::Media(media) => media.file_name(),
        }
    }
}

/// Extension from the URL path, without query/fragment noise.
fn extension_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        })
        .filter(|ext| {
            (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "jpg".to_string())
}

/// Terminal outcome of one image download.
#[derive(Debug)]
pub enum ImageOutcome {
    /// Bytes are on disk and the key is recorded.
    Saved {
        /// Final output path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// Key already recorded, or reserved by a racing worker.
    SkippedDuplicate,
}

/// Errors from the image downloader.
///
/// Only the ledger variant is fatal to a run; the rest are counted and
/// skipped by the scheduler.
#[derive(Debug, Error)]
pub enum ImageError {
    /// HTTP transfer failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Message-source media transfer failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Durable dedup state failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Downloads images under the check-and-reserve discipline.
///
/// The ledger key is reserved before any network I/O and committed only
/// after the bytes are fully on disk: racing workers produce exactly one
/// file and one record, and a failed transfer rolls the key back so a
/// future run retries it.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    http: HttpClient,
    ledger: Ledger,
}

impl ImageDownloader {
    /// Creates a downloader sharing the run's HTTP client and ledger.
    #[must_use]
    pub fn new(http: HttpClient, ledger: Ledger) -> Self {
        Self { http, ledger }
    }

    /// Downloads one image into `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Ledger`] when durable state cannot be read or
    /// written (fatal to the run); fetch/source errors otherwise
    /// (skippable, counted by the caller).
    #[instrument(skip(self, source), fields(key = %reference.dedup_key()))]
    pub async fn download(
        &self,
        reference: &ImageRef,
        dest_dir: &Path,
        source: &dyn MessageSource,
    ) -> Result<ImageOutcome, ImageError> {
        let key = reference.dedup_key();
        let Some(reservation) = self.ledger.reserve(&key, reference.ledger_kind()).await? else {
            debug!("already recorded or in flight, skipping");
            return Ok(ImageOutcome::SkippedDuplicate);
        };

        let dest = dest_dir.join(reference.file_name());
        let transfer = match reference {
            ImageRef::Url { url, .. } => self
                .http
                .download_to_path(url, &dest)
                .await
                .map_err(ImageError::from),
            ImageRef::Media(media) => match source.download_media(media, &dest).await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    // The HTTP path sweeps its own partial files; media is
                    // written by the collaborator, so sweep here.
                    let _ = tokio::fs::remove_file(&dest).await;
                    Err(ImageError::from(e))
                }
            },
        };

        match transfer {
            Ok(bytes) => {
                reservation.commit().await?;
                Ok(ImageOutcome::Saved { path: dest, bytes })
            }
            Err(e) => {
                // Dropping the uncommitted reservation rolls the key back.
                warn!(error = %e, "image download failed");
                Err(e)
            }
        }
    }
}
