//! Download engine: the page, chapter and volume tasks.
//!
//! Work fans out series → volumes → chapters → pages and progress flows back
//! up through [`ProgressCounters`]. Transient failures are absorbed by the
//! configured [`RetryPolicy`] at the task that hit them; only an exhausted
//! policy, a cancellation or an unrecoverable setup error travels upward.

use crate::config::DownloadConfig;
use crate::error::{MirrorError, Result};
use crate::models::{AssetLocator, SeriesHandle, VolumeSpec};
use crate::progress::{ProgressCounters, ProgressStore};
use crate::retry::RetryPolicy;
use crate::storage::{StorageManager, StoreOutcome};
use crate::traits::ContentResolver;
use futures::future::join_all;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Optional worker pools, one per level, shared by the whole session.
/// `None` keeps that level unbounded.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    volumes: Option<Arc<Semaphore>>,
    chapters: Option<Arc<Semaphore>>,
    pages: Option<Arc<Semaphore>>,
}

impl Limits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        fn pool(size: usize) -> Option<Arc<Semaphore>> {
            (size > 0).then(|| Arc::new(Semaphore::new(size)))
        }

        Self {
            volumes: pool(config.max_concurrent_volumes),
            chapters: pool(config.max_concurrent_chapters),
            pages: pool(config.max_concurrent_pages),
        }
    }
}

async fn acquire(pool: &Option<Arc<Semaphore>>) -> Result<Option<OwnedSemaphorePermit>> {
    match pool {
        Some(semaphore) => semaphore
            .clone()
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| MirrorError::Cancelled),
        None => Ok(None),
    }
}

/// Extracts `N` from page-count text such as `"of 45"`. Only positive counts
/// are accepted.
pub fn parse_page_count(text: &str) -> Option<u32> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\bof\s+(\d+)\b").expect("static page count pattern"));

    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse::<u32>().ok())
        .filter(|count| *count > 0)
}

/// Everything a task needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct MirrorEngine {
    series: Arc<SeriesHandle>,
    resolver: Arc<dyn ContentResolver>,
    storage: Arc<StorageManager>,
    leaf_policy: RetryPolicy,
    discovery_policy: RetryPolicy,
    limits: Limits,
    cancel: CancellationToken,
}

impl MirrorEngine {
    pub fn new(
        series: Arc<SeriesHandle>,
        resolver: Arc<dyn ContentResolver>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            series,
            resolver,
            storage,
            leaf_policy: RetryPolicy::unbounded(),
            discovery_policy: RetryPolicy::unbounded(),
            limits: Limits::unbounded(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policies(mut self, leaf: RetryPolicy, discovery: RetryPolicy) -> Self {
        self.leaf_policy = leaf;
        self.discovery_policy = discovery;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mirrors one page. Bumps `buffered` once the image URL is known and
    /// `completed` once it is stored, each exactly once however many attempts
    /// it takes.
    pub async fn fetch_page(&self, locator: &AssetLocator, counters: &ProgressCounters) -> Result<()> {
        let _permit = acquire(&self.limits.pages).await?;

        if let Some(path) = self.storage.existing_page(locator).await {
            debug!(page = %locator, path = %path.display(), "Page already on disk");
            counters.mark_buffered();
            counters.mark_completed();
            return Ok(());
        }

        let page_url = locator.page_url();
        let buffered_flag = AtomicBool::new(false);
        let buffered = &buffered_flag;
        let page_url_ref = page_url.as_str();
        let resolver = self.resolver.as_ref();
        let storage = self.storage.as_ref();

        let outcome = self
            .leaf_policy
            .run(&page_url, &self.cancel, move || async move {
                let asset_url = resolver.asset_url(page_url_ref).await?;
                if !buffered.swap(true, Ordering::SeqCst) {
                    counters.mark_buffered();
                }
                storage.store(resolver, locator, &asset_url).await
            })
            .await?;

        if let StoreOutcome::Stored(path) = &outcome {
            debug!(page = %locator, path = %path.display(), "⬇️ Page downloaded");
        }
        counters.mark_completed();
        Ok(())
    }

    /// Fetches the chapter's first page until its page count parses.
    async fn discover_page_count(&self, volume: &str, chapter: &str) -> Result<u32> {
        let first_page = self.series.locator(volume, chapter, 1).page_url();
        let url = first_page.as_str();
        let resolver = self.resolver.as_ref();

        self.discovery_policy
            .run(url, &self.cancel, move || async move {
                let text = resolver.page_count_text(url).await?;
                parse_page_count(&text).ok_or_else(|| MirrorError::malformed_page_count(url, text.trim()))
            })
            .await
    }

    /// Mirrors every page of a chapter, all pages concurrently.
    pub async fn run_chapter(
        &self,
        volume: &str,
        chapter: &str,
        counters: Arc<ProgressCounters>,
    ) -> Result<()> {
        let _permit = acquire(&self.limits.chapters).await?;

        self.storage.ensure_chapter_dir(volume, chapter).await?;

        let pages = self.discover_page_count(volume, chapter).await?;
        counters.add_discovered(u64::from(pages));
        debug!(volume = volume, chapter = chapter, pages = pages, "Chapter page count discovered");

        let tasks: Vec<JoinHandle<Result<()>>> = (1..=pages)
            .map(|page| {
                let engine = self.clone();
                let counters = counters.clone();
                let locator = self.series.locator(volume, chapter, page);
                tokio::spawn(async move { engine.fetch_page(&locator, &counters).await })
            })
            .collect();

        first_failure(join_all(tasks).await)?;

        if self.storage.archive_enabled() {
            if let Err(e) = self.storage.archive_chapter(volume, chapter).await {
                warn!(volume = volume, chapter = chapter, error = %e, "Failed to archive chapter");
            }
        }

        info!("✅ Chapter {} done ({} pages)", chapter, pages);
        Ok(())
    }

    /// Mirrors every chapter of a volume concurrently. The volume's record is
    /// reset on start and moved to a terminal state once every chapter task
    /// has returned.
    pub async fn run_volume(&self, index: usize, volume: &VolumeSpec, progress: &ProgressStore) -> Result<()> {
        let _permit = acquire(&self.limits.volumes).await?;

        info!("📚 Mirroring Volume {} ({} chapters)", volume.label(), volume.chapters.len());
        let counters = progress.start(index, volume.label());

        let tasks: Vec<JoinHandle<Result<()>>> = volume
            .chapters
            .iter()
            .map(|chapter| {
                let engine = self.clone();
                let counters = counters.clone();
                let name = volume.name.clone();
                let chapter = chapter.clone();
                tokio::spawn(async move { engine.run_chapter(&name, &chapter, counters).await })
            })
            .collect();

        match first_failure(join_all(tasks).await) {
            Ok(()) => {
                progress.complete(index);
                info!("✅ Volume {} done: {}", volume.label(), counters.snapshot());
                Ok(())
            }
            Err(e) => {
                error!("❌ Volume {} failed: {}", volume.label(), e);
                progress.fail(index, e.to_string());
                Err(e)
            }
        }
    }
}

/// Waits out every sibling, then reports the first failure if any.
fn first_failure(results: Vec<std::result::Result<Result<()>, tokio::task::JoinError>>) -> Result<()> {
    let mut failure = None;
    for result in results {
        let outcome = result.unwrap_or_else(|join_error| Err(MirrorError::Io(std::io::Error::other(join_error))));
        if let Err(e) = outcome {
            failure.get_or_insert(e);
        }
    }
    failure.map_or(Ok(()), Err)
}
