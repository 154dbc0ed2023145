//! Bounded-concurrency crawl orchestration.
//!
//! Two independent ceilings govern a run: at most `link_concurrency`
//! page/post fetches in flight globally, and at most `img_concurrency` image
//! downloads in flight per page being processed (so total image concurrency
//! can exceed the bound across concurrently-processed pages). Channel
//! expansion feeds the same dispatch path but never consumes a link permit.
//!
//! Failures are isolated: one slow or failing target never blocks the rest
//! of the queue, and every skip/failure is reported once with enough context
//! to diagnose. The single fatal condition is a ledger failure, because the
//! at-most-once guarantee cannot be upheld without durable dedup state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::CrawlConfig;
use crate::download::{HttpClient, ImageDownloader, ImageError, ImageOutcome, ImageRef};
use crate::ledger::{Ledger, LedgerError, LedgerKind};
use crate::page::PageFetcher;
use crate::parser::{ChannelTarget, PageTarget, PostTarget, Target, classify, extract_targets};
use crate::source::{ChannelWalk, MessageSource, SourceError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Error type for scheduler construction and fatal run failures.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Invalid concurrency bound provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Durable dedup state failed; the at-most-once guarantee cannot be
    /// upheld, so the run aborts.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Terminal state of one crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not yet processed.
    Pending,
    /// Processed to completion.
    Success,
    /// Key already recorded by this or an earlier run.
    SkippedDuplicate,
    /// Target could not be resolved or accessed.
    SkippedForbidden,
    /// Processing failed; reported and counted, never fatal.
    Failed,
}

/// In-flight unit of work: a leaf target plus its dispatch count and
/// terminal outcome. Owned exclusively by the scheduler and discarded once
/// terminal; nothing beyond the ledger writes survives it.
#[derive(Debug)]
struct CrawlJob {
    target: Target,
    attempts: u32,
    outcome: Outcome,
}

impl CrawlJob {
    fn new(target: Target) -> Self {
        Self {
            target,
            attempts: 0,
            outcome: Outcome::Pending,
        }
    }
}

/// Counts from one run.
///
/// Atomic so concurrent tasks update them directly; read through the
/// accessors once the run settles.
#[derive(Debug, Default)]
pub struct RunSummary {
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl RunSummary {
    /// Creates a summary with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of targets and images processed to completion.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Number of duplicates skipped via the ledger.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Number of failures, including unrecognized and forbidden targets.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Total units that reached a terminal outcome.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.skipped() + self.failed()
    }

    fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::SkippedDuplicate => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::SkippedForbidden | Outcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Pending => {}
        }
    }
}

/// Everything a spawned job needs, cloned per dispatch.
#[derive(Clone)]
struct WorkerContext {
    pages: PageFetcher,
    images: ImageDownloader,
    ledger: Ledger,
    source: Arc<dyn MessageSource>,
    output_dir: PathBuf,
    img_concurrency: usize,
    link_sem: Arc<Semaphore>,
    summary: Arc<RunSummary>,
    aborted: Arc<AtomicBool>,
}

/// Bounded-concurrency orchestrator for one crawl run.
///
/// # Concurrency model
///
/// - Each leaf target runs in its own Tokio task under a link permit
///   acquired before spawning, so channel expansion backpressures on slow
///   fetches instead of flooding the queue.
/// - Each page task spawns its image downloads under a fresh per-page
///   semaphore; permits release on task exit (RAII).
/// - The ledger is the only shared mutable resource; destination paths are
///   derived deterministically from keys, so file writes never conflict.
///
/// # Cancellation
///
/// Aborting the process mid-run is safe: image keys commit only after their
/// bytes are on disk, so an interrupted transfer leaves neither a ledger
/// record nor a surviving partial file.
pub struct Scheduler {
    config: CrawlConfig,
    pages: PageFetcher,
    images: ImageDownloader,
    ledger: Ledger,
}

impl Scheduler {
    /// Creates a scheduler for one run.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::InvalidConcurrency`] when either bound is
    /// outside 1..=100.
    #[instrument(level = "debug", skip(config, http, ledger))]
    pub fn new(config: CrawlConfig, http: HttpClient, ledger: Ledger) -> Result<Self, CrawlError> {
        for value in [config.img_concurrency, config.link_concurrency] {
            if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
                return Err(CrawlError::InvalidConcurrency { value });
            }
        }

        debug!(
            img_concurrency = config.img_concurrency,
            link_concurrency = config.link_concurrency,
            output_dir = %config.output_dir.display(),
            "creating scheduler"
        );

        Ok(Self {
            pages: PageFetcher::new(http.clone()),
            images: ImageDownloader::new(http, ledger.clone()),
            ledger,
            config,
        })
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Processes every input to a terminal outcome and returns the counts.
    ///
    /// Inputs are classified independently; channels expand into leaf
    /// targets extracted from their histories. Failures are isolated per
    /// target/image and counted.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Ledger`] when durable dedup state fails;
    /// in-flight work is drained first. No other error aborts the run.
    #[instrument(skip(self, source, inputs), fields(inputs = inputs.len()))]
    pub async fn run(
        &self,
        source: Arc<dyn MessageSource>,
        inputs: &[String],
    ) -> Result<RunSummary, CrawlError> {
        let ctx = WorkerContext {
            pages: self.pages.clone(),
            images: self.images.clone(),
            ledger: self.ledger.clone(),
            source,
            output_dir: self.config.output_dir.clone(),
            img_concurrency: self.config.img_concurrency,
            link_sem: Arc::new(Semaphore::new(self.config.link_concurrency)),
            summary: Arc::new(RunSummary::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        };
        let mut handles: Vec<JoinHandle<Result<(), LedgerError>>> = Vec::new();
        let mut seen_channels: HashSet<i64> = HashSet::new();

        info!("starting crawl");

        for input in inputs {
            if ctx.aborted.load(Ordering::SeqCst) {
                break;
            }
            match classify(input) {
                Ok(Target::Channel(channel)) => {
                    self.expand_channel(&channel, &ctx, &mut seen_channels, &mut handles)
                        .await?;
                }
                Ok(leaf) => self.dispatch(leaf, &ctx, &mut handles).await?,
                Err(e) => {
                    warn!(input = %input.trim(), error = %e, "skipping unrecognized input");
                    ctx.summary.record(Outcome::Failed);
                }
            }
        }

        debug!(task_count = handles.len(), "waiting for in-flight work");

        let mut fatal: Option<LedgerError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => warn!(error = %e, "crawl task panicked"),
            }
        }
        if let Some(e) = fatal {
            return Err(CrawlError::Ledger(e));
        }

        let WorkerContext { summary, .. } = ctx;
        info!(
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "crawl complete"
        );

        // All tasks are joined, so we should have sole ownership. If not
        // (which would be a bug), rebuild the counts from the atomics.
        match Arc::try_unwrap(summary) {
            Ok(summary) => Ok(summary),
            Err(shared) => {
                let summary = RunSummary::new();
                summary
                    .succeeded
                    .store(shared.succeeded(), Ordering::SeqCst);
                summary.skipped.store(shared.skipped(), Ordering::SeqCst);
                summary.failed.store(shared.failed(), Ordering::SeqCst);
                Ok(summary)
            }
        }
    }

    /// Spawns one leaf target under a link permit.
    ///
    /// The permit is acquired before spawning so expansion backpressures
    /// here instead of piling up unbounded tasks.
    async fn dispatch(
        &self,
        target: Target,
        ctx: &WorkerContext,
        handles: &mut Vec<JoinHandle<Result<(), LedgerError>>>,
    ) -> Result<(), CrawlError> {
        let permit = ctx
            .link_sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CrawlError::SemaphoreClosed)?;

        let ctx = ctx.clone();
        let mut job = CrawlJob::new(target);

        handles.push(tokio::spawn(async move {
            // Permit is dropped when this task exits (RAII)
            let _permit = permit;

            if ctx.aborted.load(Ordering::SeqCst) {
                return Ok(());
            }

            job.attempts += 1;
            let result = match &job.target {
                Target::Page(page) => process_page(&ctx, page).await,
                Target::Post(post) => process_post(&ctx, post).await,
                // Channels are expanded by the caller, never dispatched
                Target::Channel(_) => Ok(Outcome::Failed),
            };

            match result {
                Ok(outcome) => {
                    job.outcome = outcome;
                    debug!(
                        target = %job.target,
                        attempts = job.attempts,
                        outcome = ?job.outcome,
                        "job reached terminal outcome"
                    );
                    ctx.summary.record(outcome);
                    Ok(())
                }
                Err(e) => {
                    ctx.aborted.store(true, Ordering::SeqCst);
                    Err(e)
                }
            }
        }));
        Ok(())
    }

    /// Expands a channel target into leaf targets extracted from its
    /// history.
    ///
    /// Expansion runs on the caller and holds no link permit; only the
    /// dispatched fetches do. A failure on one channel is reported and the
    /// remaining channels proceed.
    async fn expand_channel(
        &self,
        channel: &ChannelTarget,
        ctx: &WorkerContext,
        seen: &mut HashSet<i64>,
        handles: &mut Vec<JoinHandle<Result<(), LedgerError>>>,
    ) -> Result<(), CrawlError> {
        let entities = match channel {
            ChannelTarget::All => match ctx.source.list_channels().await {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(error = %e, "cannot enumerate channels");
                    ctx.summary.record(Outcome::SkippedForbidden);
                    return Ok(());
                }
            },
            ChannelTarget::Handle(handle) => match ctx.source.resolve_channel(handle).await {
                Ok(entity) => vec![entity],
                Err(e) => {
                    warn!(handle = %handle, error = %e, "cannot resolve channel");
                    ctx.summary.record(Outcome::SkippedForbidden);
                    return Ok(());
                }
            },
        };

        for entity in entities {
            if ctx.aborted.load(Ordering::SeqCst) {
                break;
            }
            if !seen.insert(entity.id) {
                debug!(channel = %entity.title, "channel already walked this run");
                continue;
            }

            info!(channel = %entity.title, "walking channel history");
            let mut walk = ChannelWalk::new(ctx.source.as_ref(), entity.clone());

            'walk: loop {
                let posts = match walk.next_page().await {
                    Ok(Some(posts)) => posts,
                    Ok(None) => break,
                    Err(e) => {
                        // One broken channel never aborts the walk of its
                        // siblings.
                        warn!(channel = %entity.title, error = %e, "channel walk failed");
                        ctx.summary.record(match e {
                            SourceError::Forbidden { .. } | SourceError::Resolution { .. } => {
                                Outcome::SkippedForbidden
                            }
                            SourceError::Transport { .. } => Outcome::Failed,
                        });
                        break;
                    }
                };

                for post in posts {
                    let targets = extract_targets(&post.text);
                    let found = !targets.is_empty();
                    for target in targets {
                        self.dispatch(target, ctx, handles).await?;
                    }
                    if found && !self.config.full_history {
                        // Quick mode stops at the newest post that yields
                        // anything.
                        debug!(channel = %entity.title, post = post.id, "stopping after newest match");
                        break 'walk;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fetches one document page, persists its markup, and downloads its images
/// under the per-page concurrency bound.
///
/// The page key is recorded only when every image reached success or
/// duplicate-skip, so a later run retries the page (and its rolled-back
/// images) after partial failures.
async fn process_page(ctx: &WorkerContext, page: &PageTarget) -> Result<Outcome, LedgerError> {
    if ctx.ledger.has(page.dedup_key()).await? {
        debug!(url = %page.url, "page already processed");
        return Ok(Outcome::SkippedDuplicate);
    }

    let content = match ctx.pages.fetch(page).await {
        Ok(content) => content,
        Err(e) => {
            warn!(url = %page.url, error = %e, "page fetch failed");
            return Ok(Outcome::Failed);
        }
    };

    let dir = ctx.output_dir.join(&page.slug);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!(path = %dir.display(), error = %e, "cannot create page directory");
        return Ok(Outcome::Failed);
    }
    // Raw markup is persisted next to the images for offline inspection.
    if let Err(e) = tokio::fs::write(dir.join("page.html"), &content.html).await {
        warn!(path = %dir.display(), error = %e, "cannot persist page markup");
        return Ok(Outcome::Failed);
    }

    if content.images.is_empty() {
        info!(url = %page.url, "no images on page");
        ctx.ledger.record(page.dedup_key(), LedgerKind::Page).await?;
        return Ok(Outcome::Success);
    }

    info!(url = %page.url, images = content.images.len(), "downloading page images");

    // Fresh semaphore per page: the image ceiling applies to each page
    // being processed, independent of images in flight for other pages.
    let img_sem = Arc::new(Semaphore::new(ctx.img_concurrency));
    let mut tasks: Vec<JoinHandle<Result<Outcome, LedgerError>>> = Vec::new();

    for image in content.images {
        let Ok(permit) = img_sem.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        let dir = dir.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            download_image(&ctx, &image, &dir).await
        }));
    }

    let mut fatal: Option<LedgerError> = None;
    let mut failures = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(outcome)) => {
                if outcome == Outcome::Failed {
                    failures += 1;
                }
            }
            Ok(Err(e)) => {
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Err(e) => {
                warn!(error = %e, "image task panicked");
                failures += 1;
            }
        }
    }
    if let Some(e) = fatal {
        return Err(e);
    }

    if failures > 0 {
        warn!(url = %page.url, failures, "page incomplete, will retry on a future run");
        return Ok(Outcome::Failed);
    }

    ctx.ledger.record(page.dedup_key(), LedgerKind::Page).await?;
    Ok(Outcome::Success)
}

/// Downloads one image, recording its outcome in the run summary. Ledger
/// failures propagate; everything else is counted here.
async fn download_image(
    ctx: &WorkerContext,
    image: &ImageRef,
    dir: &Path,
) -> Result<Outcome, LedgerError> {
    if ctx.aborted.load(Ordering::SeqCst) {
        return Ok(Outcome::Pending);
    }
    let outcome = match ctx.images.download(image, dir, ctx.source.as_ref()).await {
        Ok(ImageOutcome::Saved { path, .. }) => {
            info!(path = %path.display(), "image saved");
            Outcome::Success
        }
        Ok(ImageOutcome::SkippedDuplicate) => Outcome::SkippedDuplicate,
        Err(ImageError::Ledger(e)) => {
            ctx.aborted.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Err(e) => {
            warn!(key = %image.dedup_key(), error = %e, "image download failed");
            Outcome::Failed
        }
    };
    ctx.summary.record(outcome);
    Ok(outcome)
}

/// Resolves one post and downloads its attached media, if any.
async fn process_post(ctx: &WorkerContext, post: &PostTarget) -> Result<Outcome, LedgerError> {
    let key = post.canonical_url();
    if ctx.ledger.has(&key).await? {
        debug!(url = %key, "post already processed");
        return Ok(Outcome::SkippedDuplicate);
    }

    let record = match ctx.source.fetch_post(post.channel_id, post.post_id).await {
        Ok(record) => record,
        Err(e @ (SourceError::Forbidden { .. } | SourceError::Resolution { .. })) => {
            warn!(url = %key, error = %e, "cannot access post");
            return Ok(Outcome::SkippedForbidden);
        }
        Err(e) => {
            warn!(url = %key, error = %e, "post fetch failed");
            return Ok(Outcome::Failed);
        }
    };

    let Some(media) = record.and_then(|r| r.media) else {
        // Posts without media are not recorded: an edit may attach media
        // later, and re-checking is one cheap call.
        info!(url = %key, "no media in post");
        return Ok(Outcome::Success);
    };

    let dir = ctx.output_dir.join(post.dir_name());
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!(path = %dir.display(), error = %e, "cannot create post directory");
        return Ok(Outcome::Failed);
    }

    match ctx
        .images
        .download(&ImageRef::Media(media), &dir, ctx.source.as_ref())
        .await
    {
        Ok(ImageOutcome::Saved { path, .. }) => {
            info!(path = %path.display(), "post media saved");
            ctx.ledger.record(&key, LedgerKind::Post).await?;
            Ok(Outcome::Success)
        }
        Ok(ImageOutcome::SkippedDuplicate) => Ok(Outcome::SkippedDuplicate),
        Err(ImageError::Ledger(e)) => Err(e),
        Err(e) => {
            warn!(url = %key, error = %e, "media download failed");
            Ok(Outcome::Failed)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::db::Database;
    use crate::source::{
        ChannelEntity, ChannelId, HistoryCursor, HistoryPage, MediaRef, PostId, PostRecord,
        UnconfiguredSource,
    };

    async fn test_ledger() -> Ledger {
        Ledger::new(Database::new_in_memory().await.unwrap())
    }

    fn test_config(out: &TempDir) -> CrawlConfig {
        CrawlConfig::default().with_output_dir(out.path())
    }

    /// In-memory message source scripted per test.
    #[derive(Default)]
    struct ScriptedSource {
        channels: Vec<ChannelEntity>,
        forbidden_handles: Vec<String>,
        // channel id -> history pages, newest first
        history: HashMap<ChannelId, Vec<Vec<PostRecord>>>,
        posts: HashMap<(ChannelId, PostId), PostRecord>,
        media_bytes: Vec<u8>,
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn resolve_channel(&self, handle: &str) -> Result<ChannelEntity, SourceError> {
            if self.forbidden_handles.iter().any(|h| h == handle) {
                return Err(SourceError::forbidden(handle));
            }
            self.channels
                .iter()
                .find(|c| c.title == handle)
                .cloned()
                .ok_or_else(|| SourceError::resolution(handle, "unknown channel"))
        }

        async fn resolve_channel_id(&self, id: ChannelId) -> Result<ChannelEntity, SourceError> {
            self.channels
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| SourceError::resolution(id.to_string(), "unknown channel"))
        }

        async fn list_channels(&self) -> Result<Vec<ChannelEntity>, SourceError> {
            Ok(self.channels.clone())
        }

        async fn history(
            &self,
            channel: &ChannelEntity,
            cursor: Option<HistoryCursor>,
        ) -> Result<HistoryPage, SourceError> {
            let Some(pages) = self.history.get(&channel.id) else {
                return Err(SourceError::forbidden(&channel.title));
            };
            #[allow(clippy::cast_possible_truncation)]
            let index = cursor.map_or(0, |c| c.0 as usize);
            let posts = pages.get(index).cloned().unwrap_or_default();
            let next = (index + 1 < pages.len()).then(|| HistoryCursor(index as u64 + 1));
            Ok(HistoryPage { posts, next })
        }

        async fn fetch_post(
            &self,
            channel_id: ChannelId,
            post_id: PostId,
        ) -> Result<Option<PostRecord>, SourceError> {
            Ok(self.posts.get(&(channel_id, post_id)).cloned())
        }

        async fn download_media(
            &self,
            _media: &MediaRef,
            dest: &std::path::Path,
        ) -> Result<u64, SourceError> {
            tokio::fs::write(dest, &self.media_bytes)
                .await
                .map_err(|e| SourceError::transport(e.to_string()))?;
            Ok(self.media_bytes.len() as u64)
        }
    }

    fn text_post(channel_id: ChannelId, id: PostId, text: &str) -> PostRecord {
        PostRecord {
            channel_id,
            id,
            text: text.to_string(),
            media: None,
        }
    }

    // ==================== Construction ====================

    #[tokio::test]
    async fn test_scheduler_rejects_zero_concurrency() {
        let out = TempDir::new().unwrap();
        let mut config = test_config(&out);
        config.link_concurrency = 0;
        let result = Scheduler::new(config, HttpClient::new(), test_ledger().await);
        assert!(matches!(
            result,
            Err(CrawlError::InvalidConcurrency { value: 0 })
        ));
    }

    #[tokio::test]
    async fn test_scheduler_rejects_excessive_concurrency() {
        let out = TempDir::new().unwrap();
        let mut config = test_config(&out);
        config.img_concurrency = 101;
        let result = Scheduler::new(config, HttpClient::new(), test_ledger().await);
        assert!(matches!(
            result,
            Err(CrawlError::InvalidConcurrency { value: 101 })
        ));
    }

    // ==================== Summary ====================

    #[test]
    fn test_summary_default_is_zero() {
        let summary = RunSummary::default();
        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.skipped(), 0);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_summary_records_outcomes() {
        let summary = RunSummary::new();
        summary.record(Outcome::Success);
        summary.record(Outcome::Success);
        summary.record(Outcome::SkippedDuplicate);
        summary.record(Outcome::SkippedForbidden);
        summary.record(Outcome::Failed);
        summary.record(Outcome::Pending);

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.total(), 5);
    }

    #[test]
    fn test_summary_thread_safe() {
        use std::thread;

        let summary = Arc::new(RunSummary::new());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let summary = Arc::clone(&summary);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    summary.record(Outcome::Success);
                    summary.record(Outcome::Failed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(summary.succeeded(), 1000);
        assert_eq!(summary.failed(), 1000);
    }

    // ==================== Classification boundary ====================

    #[tokio::test]
    async fn test_run_counts_unrecognized_inputs_as_failed() {
        let out = TempDir::new().unwrap();
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), test_ledger().await).unwrap();

        let summary = scheduler
            .run(
                Arc::new(UnconfiguredSource),
                &["not a url".to_string(), "ftp://nope".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.succeeded(), 0);
    }

    // ==================== Page processing ====================

    async fn mount_image(server: &MockServer, file: &str, expect: u64) {
        Mock::given(method("GET"))
            .and(url_path(format!("/file/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png bytes"))
            .expect(expect)
            .mount(server)
            .await;
    }

    fn test_worker_context(
        scheduler: &Scheduler,
        ledger: &Ledger,
        out: &TempDir,
    ) -> WorkerContext {
        WorkerContext {
            pages: scheduler.pages.clone(),
            images: scheduler.images.clone(),
            ledger: ledger.clone(),
            source: Arc::new(UnconfiguredSource),
            output_dir: out.path().to_path_buf(),
            img_concurrency: 4,
            link_sem: Arc::new(Semaphore::new(2)),
            summary: Arc::new(RunSummary::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_page_with_failed_image_is_not_recorded() {
        let mock_server = MockServer::start().await;
        let out = TempDir::new().unwrap();

        let body = format!(
            r#"<html><body><img src="{0}/file/ok.png"><img src="{0}/file/missing.png"></body></html>"#,
            mock_server.uri()
        );
        Mock::given(method("GET"))
            .and(url_path("/half-broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_image(&mock_server, "ok.png", 1).await;
        Mock::given(method("GET"))
            .and(url_path("/file/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let ledger = test_ledger().await;
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), ledger.clone()).unwrap();
        let page = PageTarget {
            url: format!("{}/half-broken", mock_server.uri()),
            host: crate::parser::PageHost::Telegraph,
            slug: "half-broken".to_string(),
        };
        let ctx = test_worker_context(&scheduler, &ledger, &out);

        let outcome = process_page(&ctx, &page).await.unwrap();

        // Markup is persisted, the good image landed, but the page key is
        // withheld so a future run retries the failed image.
        assert_eq!(outcome, Outcome::Failed);
        assert!(!ledger.has(page.dedup_key()).await.unwrap());
        let dir = out.path().join("half-broken");
        assert!(dir.join("page.html").exists());
        assert!(dir.join("1.png").exists());
        assert!(!dir.join("2.png").exists());
        assert_eq!(ctx.summary.succeeded(), 1);
        assert_eq!(ctx.summary.failed(), 1);
    }

    #[tokio::test]
    async fn test_page_recorded_after_all_images_succeed() {
        let mock_server = MockServer::start().await;
        let out = TempDir::new().unwrap();

        // Absolute image URLs point straight at the mock server
        let body = format!(
            r#"<html><body><img src="{0}/file/a.png"><img src="{0}/file/b.png"></body></html>"#,
            mock_server.uri()
        );
        Mock::given(method("GET"))
            .and(url_path("/ok-page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_image(&mock_server, "a.png", 1).await;
        mount_image(&mock_server, "b.png", 1).await;

        let ledger = test_ledger().await;
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), ledger.clone()).unwrap();

        let page = PageTarget {
            url: format!("{}/ok-page", mock_server.uri()),
            host: crate::parser::PageHost::Telegraph,
            slug: "ok-page".to_string(),
        };
        let ctx = test_worker_context(&scheduler, &ledger, &out);

        let outcome = process_page(&ctx, &page).await.unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(ledger.has(page.dedup_key()).await.unwrap());

        let dir = out.path().join("ok-page");
        assert!(dir.join("page.html").exists());
        assert!(dir.join("1.png").exists());
        assert!(dir.join("2.png").exists());
        assert_eq!(ctx.summary.succeeded(), 2, "two image successes counted");

        // Second pass: the page key short-circuits, no further fetches
        // (mock expectations of 1 verify on drop).
        let outcome = process_page(&ctx, &page).await.unwrap();
        assert_eq!(outcome, Outcome::SkippedDuplicate);
    }

    // ==================== Channel expansion ====================

    #[tokio::test]
    async fn test_forbidden_channel_does_not_abort_siblings() {
        let out = TempDir::new().unwrap();

        // The good channel links a post; the post carries media
        let good = ChannelEntity {
            id: 1,
            title: "good".to_string(),
        };
        let broken = ChannelEntity {
            id: 2,
            title: "broken".to_string(),
        };
        let mut source = ScriptedSource {
            channels: vec![broken.clone(), good.clone()],
            media_bytes: b"media bytes".to_vec(),
            ..ScriptedSource::default()
        };
        source.history.insert(
            good.id,
            vec![vec![text_post(1, 5, "see https://t.me/c/1/4")]],
        );
        // `broken` has no scripted history, so walking it fails Forbidden
        source.posts.insert(
            (1, 4),
            PostRecord {
                channel_id: 1,
                id: 4,
                text: String::new(),
                media: Some(MediaRef {
                    channel_id: 1,
                    post_id: 4,
                    index: 1,
                    filename_hint: None,
                }),
            },
        );

        let ledger = test_ledger().await;
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), ledger.clone()).unwrap();

        let summary = scheduler
            .run(Arc::new(source), &["all".to_string()])
            .await
            .unwrap();

        // One forbidden channel reported; the good channel's post succeeded
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 1);
        assert!(out.path().join("tg_1_4").join("1.jpg").exists());
        assert!(ledger.has("https://t.me/c/1/4").await.unwrap());
        assert!(ledger.has("tg:1:4:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_quick_mode_stops_after_newest_matching_post() {
        let out = TempDir::new().unwrap();

        let channel = ChannelEntity {
            id: 7,
            title: "chan".to_string(),
        };
        let mut source = ScriptedSource {
            channels: vec![channel.clone()],
            media_bytes: b"media".to_vec(),
            ..ScriptedSource::default()
        };
        // Newest post links one post target; an older post links another
        source.history.insert(
            channel.id,
            vec![vec![
                text_post(7, 20, "https://t.me/c/7/19"),
                text_post(7, 10, "https://t.me/c/7/9"),
            ]],
        );
        for post_id in [19, 9] {
            source.posts.insert(
                (7, post_id),
                PostRecord {
                    channel_id: 7,
                    id: post_id,
                    text: String::new(),
                    media: Some(MediaRef {
                        channel_id: 7,
                        post_id,
                        index: 1,
                        filename_hint: None,
                    }),
                },
            );
        }

        let ledger = test_ledger().await;
        let mut config = test_config(&out);
        config.full_history = false;
        let scheduler = Scheduler::new(config, HttpClient::new(), ledger.clone()).unwrap();

        let summary = scheduler
            .run(Arc::new(source), &["@chan".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1, "only the newest match is crawled");
        assert!(ledger.has("https://t.me/c/7/19").await.unwrap());
        assert!(!ledger.has("https://t.me/c/7/9").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_channel_inputs_walk_once() {
        let out = TempDir::new().unwrap();

        let channel = ChannelEntity {
            id: 3,
            title: "chan".to_string(),
        };
        let mut source = ScriptedSource {
            channels: vec![channel.clone()],
            ..ScriptedSource::default()
        };
        source.history.insert(channel.id, vec![vec![]]);

        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), test_ledger().await).unwrap();

        // The same channel twice: second expansion is a no-op, not an error
        let summary = scheduler
            .run(
                Arc::new(source),
                &["@chan".to_string(), "@chan".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(summary.failed(), 0);
    }

    // ==================== Post processing ====================

    #[tokio::test]
    async fn test_post_without_media_succeeds_but_is_not_recorded() {
        let out = TempDir::new().unwrap();

        let mut source = ScriptedSource::default();
        source
            .posts
            .insert((1, 2), text_post(1, 2, "text only post"));

        let ledger = test_ledger().await;
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), ledger.clone()).unwrap();

        let summary = scheduler
            .run(Arc::new(source), &["https://t.me/c/1/2".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1);
        // Not recorded: a later edit may attach media
        assert!(!ledger.has("https://t.me/c/1/2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_post_is_skipped_not_fatal() {
        let out = TempDir::new().unwrap();
        let scheduler =
            Scheduler::new(test_config(&out), HttpClient::new(), test_ledger().await).unwrap();

        // UnconfiguredSource fails all post resolution
        let summary = scheduler
            .run(
                Arc::new(UnconfiguredSource),
                &["https://t.me/c/1/2".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(summary.failed(), 1);
    }
}
