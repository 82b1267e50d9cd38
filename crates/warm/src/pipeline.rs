//! The warm pass: candidates → cache lookup → governed fetch → store
//!
//! One pass is single-flight and cooperative: items are processed in the
//! order storage yields them, the governor paces every remote call, and
//! the shutdown flag is checked between items and at every suspension
//! point. No single item's failure aborts the pass.

use crate::error::Result;
use crate::fetch::{FetchError, FetchedImage, ImageFetcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tubevault_cache::{CacheEntry, CacheKey, CacheStore, ImageScope};
use tubevault_core::{
    ArchiveStore, CacheConfig, FailureKind, ImageCandidate, ImageQuality, ItemStatus,
    NETWORK_INSTABILITY_THRESHOLD, Permit, ProgressEvent, ProgressSink, RateGovernor,
    ShutdownFlag,
};

/// Error messages kept verbatim on a result; the rest are only counted.
pub const ERROR_LOG_CAP: usize = 5;

/// Options for one warm pass.
#[derive(Debug, Clone)]
pub struct WarmOptions {
    /// Thumbnail quality for video passes; ignored for channels
    pub quality: ImageQuality,
    /// Cap on the number of candidates considered (not downloaded)
    pub limit: Option<usize>,
    /// Minimum spacing between remote calls
    pub delay: Duration,
    /// Resolve URLs and check the cache, but never touch the network or
    /// filesystem on a miss
    pub dry_run: bool,
    /// Retry keys that carry a `.missing` marker (the default); when
    /// false such keys are skipped with a distinguishing sub-reason
    pub refresh_missing: bool,
}

impl Default for WarmOptions {
    fn default() -> Self {
        Self {
            quality: ImageQuality::default(),
            limit: None,
            delay: Duration::from_millis(500),
            dry_run: false,
            refresh_missing: true,
        }
    }
}

/// Accumulated outcome of one warm pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmResult {
    /// Images fetched and stored (counts cache misses in dry-run mode)
    pub downloaded: u64,
    /// Candidates already cached (or marker-skipped)
    pub skipped: u64,
    /// Candidates that failed
    pub failed: u64,
    /// Candidates with no resolvable URL
    pub no_url: u64,
    /// Candidates considered
    pub total: u64,
    /// First few error messages, verbatim
    pub errors: Vec<String>,
    /// Errors beyond the log cap, counted only
    pub suppressed_errors: u64,
    /// The pass stopped at the shutdown flag
    pub was_interrupted: bool,
    /// Consecutive transport failures crossed the instability threshold
    pub network_instability_warning: bool,
}

impl WarmResult {
    fn record_error(&mut self, id: &str, message: &str) {
        if self.errors.len() < ERROR_LOG_CAP {
            self.errors.push(format!("{id}: {message}"));
        } else {
            self.suppressed_errors += 1;
        }
    }

    /// Fold another pass into this one (used by `scope = all` runs).
    pub fn absorb(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.no_url += other.no_url;
        self.total += other.total;
        for message in other.errors {
            if self.errors.len() < ERROR_LOG_CAP {
                self.errors.push(message);
            } else {
                self.suppressed_errors += 1;
            }
        }
        self.suppressed_errors += other.suppressed_errors;
        self.was_interrupted |= other.was_interrupted;
        self.network_instability_warning |= other.network_instability_warning;
    }
}

enum DownloadOutcome {
    Fetched(FetchedImage),
    Failed { kind: FailureKind, message: String, mark: bool },
    Cancelled,
}

/// Drives rate-limited warm passes over channel avatars and video
/// thumbnails. Collaborators are passed in explicitly; one warmer serves
/// many runs but at most one pass is in flight at a time.
pub struct Warmer {
    config: CacheConfig,
    cache: CacheStore,
    storage: Arc<dyn ArchiveStore>,
    fetcher: Arc<dyn ImageFetcher>,
    shutdown: ShutdownFlag,
}

impl Warmer {
    /// Assemble a warmer from its collaborators.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn ArchiveStore>,
        fetcher: Arc<dyn ImageFetcher>,
        shutdown: ShutdownFlag,
    ) -> Self {
        let cache = CacheStore::new(&config);
        Self {
            config,
            cache,
            storage,
            fetcher,
            shutdown,
        }
    }

    /// The cache store this warmer writes through.
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Warm the given scope. For `all`, channels run to completion first,
    /// then videos; an interrupt during channels skips videos entirely.
    pub async fn warm(
        &self,
        scope: ImageScope,
        options: &WarmOptions,
        progress: ProgressSink<'_>,
    ) -> Result<WarmResult> {
        let mut result = WarmResult::default();
        if scope.includes_channels() {
            result.absorb(self.warm_channels(options, progress).await?);
        }
        if scope.includes_videos() && !result.was_interrupted {
            result.absorb(self.warm_videos(options, progress).await?);
        }
        Ok(result)
    }

    /// Warm channel avatars.
    pub async fn warm_channels(
        &self,
        options: &WarmOptions,
        progress: ProgressSink<'_>,
    ) -> Result<WarmResult> {
        let candidates = self
            .storage
            .channels_needing_avatar(options.limit)
            .await?;
        debug!(candidates = candidates.len(), "Starting channel warm pass");
        self.warm_pass(candidates, options, progress).await
    }

    /// Warm video thumbnails at the configured quality.
    pub async fn warm_videos(
        &self,
        options: &WarmOptions,
        progress: ProgressSink<'_>,
    ) -> Result<WarmResult> {
        let candidates = self
            .storage
            .videos_needing_thumbnail(options.quality, options.limit)
            .await?;
        debug!(
            candidates = candidates.len(),
            quality = %options.quality,
            "Starting video warm pass"
        );
        self.warm_pass(candidates, options, progress).await
    }

    async fn warm_pass(
        &self,
        candidates: Vec<ImageCandidate>,
        options: &WarmOptions,
        progress: ProgressSink<'_>,
    ) -> Result<WarmResult> {
        let mut result = WarmResult::default();
        let mut governor = RateGovernor::new(
            options.delay,
            self.config.backoff_base,
            self.config.backoff_cap,
        );
        let mut consecutive_transport: u32 = 0;

        for candidate in candidates {
            if self.shutdown.is_raised() {
                result.was_interrupted = true;
                break;
            }
            if options
                .limit
                .is_some_and(|limit| result.total as usize >= limit)
            {
                progress(ProgressEvent::item(
                    candidate.entity.id(),
                    ItemStatus::LimitReached,
                ));
                break;
            }
            result.total += 1;
            let id = candidate.entity.id().to_string();

            let Some(url) = candidate.url.as_deref() else {
                result.no_url += 1;
                progress(ProgressEvent::item(id.as_str(), ItemStatus::NoUrl));
                continue;
            };

            let key = match CacheKey::for_entity(&candidate.entity) {
                Ok(key) => key,
                Err(e) => {
                    result.failed += 1;
                    result.record_error(&id, &e.to_string());
                    progress(ProgressEvent::item(
                        &id,
                        ItemStatus::Failed(FailureKind::Mapping),
                    ));
                    continue;
                }
            };

            match self.cache.lookup(&key) {
                Ok(CacheEntry::Present { .. }) => {
                    result.skipped += 1;
                    progress(ProgressEvent::item(
                        &id,
                        ItemStatus::Skipped {
                            negative_hit: false,
                        },
                    ));
                    continue;
                }
                Ok(CacheEntry::Missing { .. }) if !options.refresh_missing => {
                    result.skipped += 1;
                    progress(ProgressEvent::item(
                        &id,
                        ItemStatus::Skipped { negative_hit: true },
                    ));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    result.failed += 1;
                    result.record_error(&id, &e.to_string());
                    progress(ProgressEvent::item(
                        &id,
                        ItemStatus::Failed(FailureKind::Storage),
                    ));
                    continue;
                }
            }

            if governor.acquire(&self.shutdown).await == Permit::Cancelled {
                // Abandoned before the fetch: not considered, no outcome
                result.total -= 1;
                result.was_interrupted = true;
                break;
            }

            if options.dry_run {
                result.downloaded += 1;
                progress(ProgressEvent::item(id.as_str(), ItemStatus::DryRun));
                continue;
            }

            match self.download(&mut governor, url, progress).await {
                DownloadOutcome::Fetched(image) => match self.cache.store(&key, &image.bytes) {
                    Ok(_) => {
                        result.downloaded += 1;
                        consecutive_transport = 0;
                        progress(ProgressEvent::item(id.as_str(), ItemStatus::Downloaded));
                    }
                    Err(e) => {
                        result.failed += 1;
                        result.record_error(&id, &e.to_string());
                        progress(ProgressEvent::item(
                            &id,
                            ItemStatus::Failed(FailureKind::Storage),
                        ));
                    }
                },
                DownloadOutcome::Failed {
                    kind,
                    message,
                    mark,
                } => {
                    result.failed += 1;
                    result.record_error(&id, &message);
                    if mark {
                        if let Err(e) = self.cache.mark_missing(&key, kind.as_str()) {
                            warn!(id = %id, error = %e, "Failed to record missing marker");
                        }
                    }
                    if kind == FailureKind::Transport {
                        consecutive_transport += 1;
                        if consecutive_transport >= NETWORK_INSTABILITY_THRESHOLD {
                            result.network_instability_warning = true;
                        }
                    }
                    progress(ProgressEvent::item(id.as_str(), ItemStatus::Failed(kind)));
                }
                DownloadOutcome::Cancelled => {
                    // Abandoned mid-retry: not considered, no outcome
                    result.total -= 1;
                    result.was_interrupted = true;
                    break;
                }
            }
        }

        if result.network_instability_warning {
            warn!(
                failed = result.failed,
                "Repeated transport failures during warm pass; network may be unstable"
            );
        }
        Ok(result)
    }

    /// Fetch one URL under governor pacing: one replay after a 429 backoff,
    /// transport retries up to the configured budget, everything else
    /// final on first sight.
    async fn download(
        &self,
        governor: &mut RateGovernor,
        url: &str,
        progress: ProgressSink<'_>,
    ) -> DownloadOutcome {
        let mut throttled_once = false;
        let mut transport_attempts: u32 = 0;

        loop {
            match self.fetcher.fetch(url).await {
                Ok(image) => {
                    governor.record_success();
                    return DownloadOutcome::Fetched(image);
                }
                Err(FetchError::Throttled) => {
                    let delay = governor.record_throttled();
                    progress(ProgressEvent::Backoff { delay });
                    if throttled_once {
                        // The window keeps growing for the next item
                        return DownloadOutcome::Failed {
                            kind: FailureKind::Throttled,
                            message: "rate limited twice in a row".to_string(),
                            mark: false,
                        };
                    }
                    throttled_once = true;
                }
                Err(err @ FetchError::Transport { .. }) => {
                    transport_attempts += 1;
                    governor.record_failure();
                    if transport_attempts > self.config.max_retries {
                        return DownloadOutcome::Failed {
                            kind: FailureKind::Transport,
                            message: err.to_string(),
                            mark: true,
                        };
                    }
                    debug!(
                        url = %url,
                        attempt = transport_attempts,
                        error = %err,
                        "Transport error, retrying"
                    );
                }
                Err(err @ (FetchError::NotFound { .. } | FetchError::Content { .. })) => {
                    governor.record_failure();
                    return DownloadOutcome::Failed {
                        kind: err.failure_kind(),
                        message: err.to_string(),
                        mark: true,
                    };
                }
            }

            // Retry path: wait out the backoff or the normal spacing
            if governor.acquire(&self.shutdown).await == Permit::Cancelled {
                return DownloadOutcome::Cancelled;
            }
        }
    }
}
