//! The enrichment coordinator: batched, durable, interruptible
//!
//! One run holds the advisory enrichment lock, slices candidates into
//! batches of the remote API's size limit, and commits each batch as one
//! storage transaction. Outcomes are buffered per batch and delivered
//! after the commit resolves, so a failed commit can convert the whole
//! batch without breaking input order.

use crate::error::{Error, Result};
use crate::fields::{self, TITLE_FIELD, changed_fields};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tubevault_core::remote::BATCH_SIZE;
use tubevault_core::storage::{
    AdvisoryLockToken, ArchiveStore, EntityChange, EnrichmentPriority, FieldSet, StagedUpdate,
};
use tubevault_core::{
    CacheConfig, EntityKind, FailureKind, ItemStatus, MetadataApi, NETWORK_INSTABILITY_THRESHOLD,
    Permit, ProgressEvent, ProgressSink, RateGovernor, ShutdownFlag,
};
use uuid::Uuid;

/// Stable name of the single cross-process enrichment lock.
pub const ENRICHMENT_LOCK_NAME: &str = "tubevault.enrichment";

/// Options for one enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Candidate-selection policy
    pub priority: EnrichmentPriority,
    /// Cap on candidates per kind
    pub limit: Option<usize>,
    /// Minimum spacing between remote batch calls
    pub delay: Duration,
    /// Perform remote calls and diffs but commit nothing
    pub dry_run: bool,
    /// Carry full ID lists on the result, not just counts
    pub verbose: bool,
    /// Also enrich playlists
    pub include_playlists: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            priority: EnrichmentPriority::default(),
            limit: None,
            delay: Duration::from_millis(500),
            dry_run: false,
            verbose: false,
            include_playlists: false,
        }
    }
}

/// Per-item outcome of an enrichment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// At least one field changed and was staged
    Updated {
        /// Names of the changed fields
        fields_changed: Vec<String>,
        /// Previous title, when the title changed
        old_title: Option<String>,
        /// New title, when the title changed
        new_title: Option<String>,
    },
    /// The remote no longer serves this item
    Deleted,
    /// Nothing to change
    Skipped {
        /// Why the item was skipped
        reason: String,
    },
    /// The item could not be processed
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable detail
        message: String,
    },
}

impl EnrichmentOutcome {
    /// The progress status for this outcome.
    #[must_use]
    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Updated { .. } => ItemStatus::Updated,
            Self::Deleted => ItemStatus::Deleted,
            Self::Skipped { .. } => ItemStatus::Unchanged,
            Self::Failed { kind, .. } => ItemStatus::Failed(*kind),
        }
    }
}

/// One entry in the run's ordered result buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Which table the item lives in
    pub kind: EntityKind,
    /// The item's opaque identifier
    pub id: String,
    /// What happened to it
    pub outcome: EnrichmentOutcome,
}

/// Aggregated, final result of one enrichment run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Correlates this run with its persisted report
    pub run_id: Uuid,
    /// The policy the run selected candidates under
    pub priority: EnrichmentPriority,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub completed_at: DateTime<Utc>,
    /// Monotonic run duration
    pub duration: Duration,
    /// Items with a delivered outcome
    pub processed: u64,
    /// Items updated (staged and committed, or diffed in dry-run)
    pub updated: u64,
    /// Items the remote no longer serves
    pub deleted: u64,
    /// Items with nothing to change
    pub skipped: u64,
    /// Items that failed
    pub failed: u64,
    /// Batches that produced outcomes
    pub batches_processed: u64,
    /// Remote calls made (replays included)
    pub quota_used: u64,
    /// High-water mark of the consecutive-failure counter
    pub consecutive_failures: u32,
    /// The counter crossed the instability threshold at some point
    pub network_instability_warning: bool,
    /// The run stopped at the shutdown flag
    pub was_interrupted: bool,
    /// Ordered outcome buffer, input order within and across batches
    pub details: Vec<ItemOutcome>,
    /// IDs updated (verbose runs only)
    pub updated_ids: Vec<String>,
    /// IDs deleted (verbose runs only)
    pub deleted_ids: Vec<String>,
    /// IDs failed (verbose runs only)
    pub failed_ids: Vec<String>,
}

impl RunResult {
    fn new(priority: EnrichmentPriority, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            priority,
            dry_run,
            started_at: now,
            completed_at: now,
            duration: Duration::ZERO,
            processed: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            batches_processed: 0,
            quota_used: 0,
            consecutive_failures: 0,
            network_instability_warning: false,
            was_interrupted: false,
            details: Vec::new(),
            updated_ids: Vec::new(),
            deleted_ids: Vec::new(),
            failed_ids: Vec::new(),
        }
    }
}

/// Releases the advisory lock on every exit path, panics included.
struct LockGuard {
    storage: Arc<dyn ArchiveStore>,
    token: Option<AdvisoryLockToken>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.storage.release_advisory_lock(token);
            debug!("Released enrichment lock");
        }
    }
}

enum BatchFetch {
    Records(BTreeMap<String, FieldSet>),
    Throttled,
    Transport(String),
    Cancelled,
}

/// Drives batched enrichment runs. Collaborators are passed in
/// explicitly; at most one run is in flight per coordinator.
pub struct Coordinator {
    config: CacheConfig,
    storage: Arc<dyn ArchiveStore>,
    api: Arc<dyn MetadataApi>,
    shutdown: ShutdownFlag,
}

impl Coordinator {
    /// Assemble a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn ArchiveStore>,
        api: Arc<dyn MetadataApi>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            storage,
            api,
            shutdown,
        }
    }

    /// Enrich the given kinds under the advisory lock.
    ///
    /// # Errors
    ///
    /// Returns `LockUnavailable` without waiting when another process
    /// holds the lock, `Validation` for bad arguments, and `Storage` when
    /// candidate listing fails. Batch- and item-level problems are
    /// outcomes in the result, never errors.
    pub async fn enrich(
        &self,
        kinds: &[EntityKind],
        options: &EnrichOptions,
        progress: ProgressSink<'_>,
    ) -> Result<RunResult> {
        let kinds = effective_kinds(kinds, options)?;

        let token = self
            .storage
            .try_acquire_advisory_lock(ENRICHMENT_LOCK_NAME)?
            .ok_or(Error::LockUnavailable)?;
        let _guard = LockGuard {
            storage: Arc::clone(&self.storage),
            token: Some(token),
        };
        info!(kinds = ?kinds, priority = %options.priority, dry_run = options.dry_run, "Starting enrichment run");

        let mut result = RunResult::new(options.priority, options.dry_run);
        let started = std::time::Instant::now();
        let mut governor = RateGovernor::new(
            options.delay,
            self.config.backoff_base,
            self.config.backoff_cap,
        );
        let mut consecutive: u32 = 0;
        let mut batch_index: u64 = 0;

        'kinds: for kind in kinds {
            if self.shutdown.is_raised() {
                result.was_interrupted = true;
                break;
            }
            let candidates = self
                .storage
                .enrichment_candidates(kind, options.priority, options.limit)
                .await?;
            debug!(kind = %kind, candidates = candidates.len(), "Listed enrichment candidates");

            for chunk in candidates.chunks(BATCH_SIZE) {
                if self.shutdown.is_raised() {
                    result.was_interrupted = true;
                    break 'kinds;
                }
                if governor.acquire(&self.shutdown).await == Permit::Cancelled {
                    result.was_interrupted = true;
                    break 'kinds;
                }
                batch_index += 1;
                debug!(batch_index, kind = %kind, size = chunk.len(), "Processing enrichment batch");

                let status = self
                    .run_batch(kind, chunk, options, &mut governor, &mut result, progress)
                    .await;
                match status {
                    BatchStatus::Completed => consecutive = 0,
                    BatchStatus::Failed => consecutive += 1,
                    BatchStatus::Cancelled => {
                        result.was_interrupted = true;
                        break 'kinds;
                    }
                }
                result.consecutive_failures = result.consecutive_failures.max(consecutive);
                if consecutive >= NETWORK_INSTABILITY_THRESHOLD {
                    result.network_instability_warning = true;
                }
            }
        }

        result.completed_at = Utc::now();
        result.duration = started.elapsed();
        if result.network_instability_warning {
            warn!(
                consecutive_failures = result.consecutive_failures,
                "Enrichment run saw repeated batch failures; network may be unstable"
            );
        }
        info!(
            processed = result.processed,
            updated = result.updated,
            deleted = result.deleted,
            failed = result.failed,
            quota_used = result.quota_used,
            interrupted = result.was_interrupted,
            "Enrichment run finished"
        );
        Ok(result)
    }

    /// Process one batch end to end. Outcomes are buffered and delivered
    /// only after the commit resolves.
    async fn run_batch(
        &self,
        kind: EntityKind,
        chunk: &[String],
        options: &EnrichOptions,
        governor: &mut RateGovernor,
        result: &mut RunResult,
        progress: ProgressSink<'_>,
    ) -> BatchStatus {
        let current = match self.storage.load_fields(kind, chunk).await {
            Ok(current) => current,
            Err(e) => {
                deliver_uniform_failure(
                    kind,
                    chunk,
                    FailureKind::Storage,
                    &e.to_string(),
                    options,
                    result,
                    progress,
                );
                return BatchStatus::Failed;
            }
        };

        let fetched = self.fetch_batch(kind, chunk, governor, result, progress).await;
        let records = match fetched {
            BatchFetch::Records(records) => {
                governor.record_success();
                records
            }
            BatchFetch::Throttled => {
                // A second throttle keeps the backoff window growing for
                // whatever batch comes next
                let delay = governor.record_throttled();
                progress(ProgressEvent::Backoff { delay });
                deliver_uniform_failure(
                    kind,
                    chunk,
                    FailureKind::Throttled,
                    "rate limited twice in a row",
                    options,
                    result,
                    progress,
                );
                return BatchStatus::Failed;
            }
            BatchFetch::Transport(message) => {
                governor.record_failure();
                deliver_uniform_failure(
                    kind,
                    chunk,
                    FailureKind::Transport,
                    &message,
                    options,
                    result,
                    progress,
                );
                return BatchStatus::Failed;
            }
            BatchFetch::Cancelled => return BatchStatus::Cancelled,
        };

        // Build outcomes in input order, staging as we go
        let mut buffered: Vec<(String, EnrichmentOutcome)> = Vec::with_capacity(chunk.len());
        let mut staged: Vec<StagedUpdate> = Vec::new();
        for id in chunk {
            match records.get(id) {
                Some(desired) => {
                    let Some(current_fields) = current.get(id) else {
                        buffered.push((
                            id.clone(),
                            EnrichmentOutcome::Failed {
                                kind: FailureKind::Mapping,
                                message: "no stored row to diff against".to_string(),
                            },
                        ));
                        continue;
                    };
                    let changed = changed_fields(current_fields, desired);
                    if changed.is_empty() {
                        buffered.push((
                            id.clone(),
                            EnrichmentOutcome::Skipped {
                                reason: "unchanged".to_string(),
                            },
                        ));
                        continue;
                    }
                    let title_changed = changed.contains_key(TITLE_FIELD);
                    let outcome = EnrichmentOutcome::Updated {
                        fields_changed: changed.keys().map(|k| (*k).to_string()).collect(),
                        old_title: title_changed
                            .then(|| current_fields.get(TITLE_FIELD).and_then(title_text))
                            .flatten(),
                        new_title: title_changed
                            .then(|| changed.get(TITLE_FIELD).and_then(title_text))
                            .flatten(),
                    };
                    if !options.dry_run {
                        staged.push(StagedUpdate {
                            kind,
                            id: id.clone(),
                            change: EntityChange::Patch(changed),
                        });
                    }
                    buffered.push((id.clone(), outcome));
                }
                None => {
                    if !options.dry_run {
                        staged.push(StagedUpdate {
                            kind,
                            id: id.clone(),
                            change: EntityChange::Tombstone,
                        });
                    }
                    buffered.push((id.clone(), EnrichmentOutcome::Deleted));
                }
            }
        }

        // Commit the staged updates as one unit
        let commit_error = if staged.is_empty() {
            None
        } else {
            match self.commit_staged(staged).await {
                Ok(()) => None,
                Err(message) => Some(message),
            }
        };

        if let Some(message) = commit_error {
            deliver_uniform_failure(
                kind,
                chunk,
                FailureKind::Commit,
                &message,
                options,
                result,
                progress,
            );
            return BatchStatus::Failed;
        }

        for (id, outcome) in buffered {
            deliver(kind, id, outcome, options, result, progress);
        }
        result.batches_processed += 1;
        BatchStatus::Completed
    }

    async fn commit_staged(&self, staged: Vec<StagedUpdate>) -> std::result::Result<(), String> {
        let mut txn = match self.storage.begin_batch() {
            Ok(txn) => txn,
            Err(e) => return Err(e.to_string()),
        };
        for update in staged {
            txn.stage(update);
        }
        debug!(staged = txn.staged_count(), "Committing enrichment batch");
        txn.commit().await.map_err(|e| e.to_string())
    }

    /// One remote call for the batch, with a single replay after a 429
    /// backoff window.
    async fn fetch_batch(
        &self,
        kind: EntityKind,
        chunk: &[String],
        governor: &mut RateGovernor,
        result: &mut RunResult,
        progress: ProgressSink<'_>,
    ) -> BatchFetch {
        let mut replayed = false;
        loop {
            result.quota_used += 1;
            match self.call_api(kind, chunk).await {
                Ok(records) => return BatchFetch::Records(records),
                Err(e) if e.is_throttled() => {
                    if replayed {
                        return BatchFetch::Throttled;
                    }
                    replayed = true;
                    let delay = governor.record_throttled();
                    progress(ProgressEvent::Backoff { delay });
                    if governor.acquire(&self.shutdown).await == Permit::Cancelled {
                        return BatchFetch::Cancelled;
                    }
                }
                Err(e) => return BatchFetch::Transport(e.to_string()),
            }
        }
    }

    async fn call_api(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> tubevault_core::ApiResult<BTreeMap<String, FieldSet>> {
        let records = match kind {
            EntityKind::Channel => self
                .api
                .channels_by_ids(ids)
                .await?
                .into_iter()
                .map(|c| (c.id.clone(), fields::channel_fields(&c)))
                .collect(),
            EntityKind::Video => self
                .api
                .videos_by_ids(ids)
                .await?
                .into_iter()
                .map(|v| (v.id.clone(), fields::video_fields(&v)))
                .collect(),
            EntityKind::Playlist => self
                .api
                .playlists_by_ids(ids)
                .await?
                .into_iter()
                .map(|p| (p.id.clone(), fields::playlist_fields(&p)))
                .collect(),
        };
        Ok(records)
    }

}

/// Convert a whole batch into one failure kind, preserving input order.
fn deliver_uniform_failure(
    kind: EntityKind,
    chunk: &[String],
    failure: FailureKind,
    message: &str,
    options: &EnrichOptions,
    result: &mut RunResult,
    progress: ProgressSink<'_>,
) {
    for id in chunk {
        deliver(
            kind,
            id.clone(),
            EnrichmentOutcome::Failed {
                kind: failure,
                message: message.to_string(),
            },
            options,
            result,
            progress,
        );
    }
    result.batches_processed += 1;
}

enum BatchStatus {
    Completed,
    Failed,
    Cancelled,
}

fn title_text(value: &tubevault_core::storage::FieldValue) -> Option<String> {
    value.as_text().map(str::to_string)
}

fn effective_kinds(kinds: &[EntityKind], options: &EnrichOptions) -> Result<Vec<EntityKind>> {
    if kinds.is_empty() && !options.include_playlists {
        return Err(Error::validation("at least one entity kind is required"));
    }
    let mut effective = Vec::new();
    for kind in kinds {
        if effective.contains(kind) {
            return Err(Error::validation(format!("duplicate entity kind {kind}")));
        }
        effective.push(*kind);
    }
    if options.include_playlists && !effective.contains(&EntityKind::Playlist) {
        effective.push(EntityKind::Playlist);
    }
    Ok(effective)
}

fn deliver(
    kind: EntityKind,
    id: String,
    outcome: EnrichmentOutcome,
    options: &EnrichOptions,
    result: &mut RunResult,
    progress: ProgressSink<'_>,
) {
    progress(ProgressEvent::item(id.as_str(), outcome.status()));
    result.processed += 1;
    match &outcome {
        EnrichmentOutcome::Updated { .. } => {
            result.updated += 1;
            if options.verbose {
                result.updated_ids.push(id.clone());
            }
        }
        EnrichmentOutcome::Deleted => {
            result.deleted += 1;
            if options.verbose {
                result.deleted_ids.push(id.clone());
            }
        }
        EnrichmentOutcome::Skipped { .. } => result.skipped += 1,
        EnrichmentOutcome::Failed { .. } => {
            result.failed += 1;
            if options.verbose {
                result.failed_ids.push(id.clone());
            }
        }
    }
    result.details.push(ItemOutcome { kind, id, outcome });
}
