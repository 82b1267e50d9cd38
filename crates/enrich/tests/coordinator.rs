//! End-to-end enrichment scenarios against in-memory collaborators

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tubevault_core::remote::{RemoteChannel, RemotePlaylist, RemoteVideo, VideoStatistics};
use tubevault_core::storage::{
    AdvisoryLockToken, ArchiveStore, BatchTransaction, EntityChange, EnrichmentPriority,
    FieldSet, StagedUpdate, StorageError, StorageResult,
};
use tubevault_core::{
    ApiError, ApiResult, CacheConfig, EntityKind, ImageCandidate, ImageQuality, MetadataApi,
    ProgressEvent, ShutdownFlag,
};
use tubevault_enrich::{
    Coordinator, EnrichOptions, EnrichmentOutcome, Error, RunResult, video_fields,
};

// ---------------------------------------------------------------------------
// In-memory Storage collaborator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    candidates: Vec<String>,
    rows: Mutex<BTreeMap<String, FieldSet>>,
    tombstones: Mutex<Vec<String>>,
    committed_batches: Mutex<Vec<Vec<StagedUpdate>>>,
    fail_commits_remaining: AtomicUsize,
    lock_held: Mutex<bool>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    seen_limit: Mutex<Option<Option<usize>>>,
    seen_priority: Mutex<Option<EnrichmentPriority>>,
}

#[derive(Clone)]
struct MockStorage {
    inner: Arc<StoreInner>,
}

impl MockStorage {
    fn new(candidates: Vec<&str>, rows: BTreeMap<String, FieldSet>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                candidates: candidates.into_iter().map(String::from).collect(),
                rows: Mutex::new(rows),
                ..StoreInner::default()
            }),
        }
    }

    fn hold_lock(&self) {
        *self.inner.lock_held.lock().unwrap() = true;
    }

    fn fail_next_commits(&self, count: usize) {
        self.inner
            .fail_commits_remaining
            .store(count, Ordering::SeqCst);
    }

    fn lock_is_free(&self) -> bool {
        !*self.inner.lock_held.lock().unwrap()
    }

    fn committed_batches(&self) -> Vec<Vec<StagedUpdate>> {
        self.inner.committed_batches.lock().unwrap().clone()
    }

    fn tombstones(&self) -> Vec<String> {
        self.inner.tombstones.lock().unwrap().clone()
    }

    fn row(&self, id: &str) -> Option<FieldSet> {
        self.inner.rows.lock().unwrap().get(id).cloned()
    }
}

struct MockBatch {
    staged: Vec<StagedUpdate>,
    inner: Arc<StoreInner>,
}

#[async_trait]
impl BatchTransaction for MockBatch {
    fn stage(&mut self, update: StagedUpdate) {
        self.staged.push(update);
    }

    fn staged_count(&self) -> usize {
        self.staged.len()
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let failing = self.inner.fail_commits_remaining.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner
                .fail_commits_remaining
                .store(failing - 1, Ordering::SeqCst);
            return Err(StorageError::backend("commit", "injected commit failure"));
        }
        let mut rows = self.inner.rows.lock().unwrap();
        for update in &self.staged {
            match &update.change {
                EntityChange::Patch(patch) => {
                    let row = rows.entry(update.id.clone()).or_default();
                    for (name, value) in patch {
                        row.insert(name, value.clone());
                    }
                }
                EntityChange::Tombstone => {
                    self.inner.tombstones.lock().unwrap().push(update.id.clone());
                }
            }
        }
        self.inner
            .committed_batches
            .lock()
            .unwrap()
            .push(self.staged.clone());
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}

#[async_trait]
impl ArchiveStore for MockStorage {
    async fn channels_needing_avatar(
        &self,
        _limit: Option<usize>,
    ) -> StorageResult<Vec<ImageCandidate>> {
        Ok(Vec::new())
    }

    async fn videos_needing_thumbnail(
        &self,
        _quality: ImageQuality,
        _limit: Option<usize>,
    ) -> StorageResult<Vec<ImageCandidate>> {
        Ok(Vec::new())
    }

    async fn enrichment_candidates(
        &self,
        _kind: EntityKind,
        priority: EnrichmentPriority,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>> {
        *self.inner.seen_limit.lock().unwrap() = Some(limit);
        *self.inner.seen_priority.lock().unwrap() = Some(priority);
        let mut candidates = self.inner.candidates.clone();
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        Ok(candidates)
    }

    async fn load_fields(
        &self,
        _kind: EntityKind,
        ids: &[String],
    ) -> StorageResult<BTreeMap<String, FieldSet>> {
        let rows = self.inner.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|fields| (id.clone(), fields.clone())))
            .collect())
    }

    fn begin_batch(&self) -> StorageResult<Box<dyn BatchTransaction>> {
        Ok(Box::new(MockBatch {
            staged: Vec::new(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn try_acquire_advisory_lock(&self, _name: &str) -> StorageResult<Option<AdvisoryLockToken>> {
        let mut held = self.inner.lock_held.lock().unwrap();
        if *held {
            return Ok(None);
        }
        *held = true;
        self.inner.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Some(AdvisoryLockToken::new(7)))
    }

    fn release_advisory_lock(&self, _token: AdvisoryLockToken) {
        *self.inner.lock_held.lock().unwrap() = false;
        self.inner.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// In-memory Remote API collaborator
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum ApiScript {
    Respond,
    Throttled,
    Transport,
}

#[derive(Default)]
struct MockApi {
    remote_rows: BTreeMap<String, RemoteVideo>,
    script: Mutex<VecDeque<ApiScript>>,
    calls: AtomicUsize,
}

impl MockApi {
    fn new(remote_rows: Vec<RemoteVideo>) -> Self {
        Self {
            remote_rows: remote_rows.into_iter().map(|v| (v.id.clone(), v)).collect(),
            ..MockApi::default()
        }
    }

    fn with_script(self, steps: Vec<ApiScript>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ApiScript {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ApiScript::Respond)
    }
}

#[async_trait]
impl MetadataApi for MockApi {
    async fn channels_by_ids(&self, _ids: &[String]) -> ApiResult<Vec<RemoteChannel>> {
        Ok(Vec::new())
    }

    async fn videos_by_ids(&self, ids: &[String]) -> ApiResult<Vec<RemoteVideo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            ApiScript::Respond => Ok(ids
                .iter()
                .filter_map(|id| self.remote_rows.get(id).cloned())
                .collect()),
            ApiScript::Throttled => Err(ApiError::Throttled),
            ApiScript::Transport => Err(ApiError::transport("connection reset")),
        }
    }

    async fn playlists_by_ids(&self, _ids: &[String]) -> ApiResult<Vec<RemotePlaylist>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn remote_video(id: &str, title: &str) -> RemoteVideo {
    RemoteVideo {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("description of {id}"),
        default_language: Some("en".to_string()),
        category_id: Some("10".to_string()),
        statistics: VideoStatistics {
            view_count: Some(100),
            like_count: Some(5),
            comment_count: None,
        },
    }
}

fn stored_rows(videos: &[RemoteVideo]) -> BTreeMap<String, FieldSet> {
    videos
        .iter()
        .map(|v| (v.id.clone(), video_fields(v)))
        .collect()
}

struct Harness {
    coordinator: Coordinator,
    storage: MockStorage,
    api: Arc<MockApi>,
    shutdown: ShutdownFlag,
}

fn harness(storage: MockStorage, api: MockApi) -> Harness {
    let api = Arc::new(api);
    let shutdown = ShutdownFlag::new();
    let coordinator = Coordinator::new(
        CacheConfig::new("/nonexistent"),
        Arc::new(storage.clone()),
        Arc::clone(&api) as Arc<dyn MetadataApi>,
        shutdown.clone(),
    );
    Harness {
        coordinator,
        storage,
        api,
        shutdown,
    }
}

fn zero_delay() -> EnrichOptions {
    EnrichOptions {
        delay: Duration::ZERO,
        ..EnrichOptions::default()
    }
}

async fn run(h: &Harness, options: &EnrichOptions) -> (RunResult, Vec<ProgressEvent>) {
    let mut events = Vec::new();
    let result = h
        .coordinator
        .enrich(&[EntityKind::Video], options, &mut |e| events.push(e))
        .await
        .unwrap();
    (result, events)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detects_deletions_in_batch() {
    // V1 still exists remotely with a new title; V2 is gone
    let old = [remote_video("V1", "old title"), remote_video("V2", "kept")];
    let storage = MockStorage::new(vec!["V1", "V2"], stored_rows(&old));
    let api = MockApi::new(vec![remote_video("V1", "new title")]);
    let h = harness(storage, api);

    let (result, _events) = run(&h, &zero_delay()).await;

    assert_eq!(result.processed, 2);
    assert_eq!(result.updated, 1);
    assert_eq!(result.deleted, 1);
    assert_eq!(result.batches_processed, 1);
    assert_eq!(result.quota_used, 1);
    assert!(!result.was_interrupted);

    // Outcomes in input order
    assert_eq!(result.details[0].id, "V1");
    match &result.details[0].outcome {
        EnrichmentOutcome::Updated {
            fields_changed,
            old_title,
            new_title,
        } => {
            assert_eq!(fields_changed, &vec!["title".to_string()]);
            assert_eq!(old_title.as_deref(), Some("old title"));
            assert_eq!(new_title.as_deref(), Some("new title"));
        }
        other => panic!("expected Updated, got {other:?}"),
    }
    assert_eq!(result.details[1].outcome, EnrichmentOutcome::Deleted);

    // Both changes landed in one commit
    let batches = h.storage.committed_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(matches!(batches[0][0].change, EntityChange::Patch(_)));
    assert!(matches!(batches[0][1].change, EntityChange::Tombstone));
    assert_eq!(h.storage.tombstones(), vec!["V2".to_string()]);

    // The patch is visible in storage
    let row = h.storage.row("V1").unwrap();
    assert_eq!(
        row.get("title").and_then(|v| v.as_text()),
        Some("new title")
    );
}

#[tokio::test]
async fn unchanged_rows_are_skipped_without_a_commit() {
    let rows = [remote_video("V1", "same")];
    let storage = MockStorage::new(vec!["V1"], stored_rows(&rows));
    let api = MockApi::new(rows.to_vec());
    let h = harness(storage, api);

    let (result, events) = run(&h, &zero_delay()).await;

    assert_eq!(result.skipped, 1);
    assert_eq!(result.updated, 0);
    assert_eq!(result.batches_processed, 1);
    assert!(h.storage.committed_batches().is_empty());
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Item { .. }))
            .map(ProgressEvent::status_label)
            .collect::<Vec<_>>(),
        vec!["skipped:unchanged".to_string()]
    );
}

#[tokio::test]
async fn missing_stored_row_is_a_mapping_failure() {
    // Candidate listed but its row is gone by load time
    let storage = MockStorage::new(vec!["V1"], BTreeMap::new());
    let api = MockApi::new(vec![remote_video("V1", "title")]);
    let h = harness(storage, api);

    let (result, _) = run(&h, &zero_delay()).await;

    assert_eq!(result.failed, 1);
    match &result.details[0].outcome {
        EnrichmentOutcome::Failed { kind, .. } => {
            assert_eq!(*kind, tubevault_core::FailureKind::Mapping);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn lock_unavailable_returns_immediately() {
    let storage = MockStorage::new(vec!["V1"], BTreeMap::new());
    storage.hold_lock();
    let api = MockApi::new(Vec::new());
    let h = harness(storage, api);

    let mut events = Vec::new();
    let err = h
        .coordinator
        .enrich(&[EntityKind::Video], &zero_delay(), &mut |e| events.push(e))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LockUnavailable));
    assert_eq!(h.api.calls(), 0);
    assert!(events.is_empty());
}

#[tokio::test]
async fn lock_is_released_after_a_successful_run() {
    let rows = [remote_video("V1", "t")];
    let storage = MockStorage::new(vec!["V1"], stored_rows(&rows));
    let api = MockApi::new(rows.to_vec());
    let h = harness(storage, api);

    run(&h, &zero_delay()).await;

    assert!(h.storage.lock_is_free());
    assert_eq!(h.storage.inner.acquires.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage.inner.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interrupt_between_batches_releases_lock() {
    // 120 candidates = 3 batches; stop after the first batch's outcomes
    let ids: Vec<String> = (0..120).map(|i| format!("V{i:03}")).collect();
    let remote: Vec<RemoteVideo> = ids.iter().map(|id| remote_video(id, "new")).collect();
    let stored: Vec<RemoteVideo> = ids.iter().map(|id| remote_video(id, "old")).collect();
    let storage = MockStorage::new(ids.iter().map(String::as_str).collect(), stored_rows(&stored));
    let api = MockApi::new(remote);
    let h = harness(storage, api);

    let shutdown = h.shutdown.clone();
    let mut delivered = 0u32;
    let mut events = Vec::new();
    let result = h
        .coordinator
        .enrich(&[EntityKind::Video], &zero_delay(), &mut |e| {
            if matches!(e, ProgressEvent::Item { .. }) {
                delivered += 1;
                if delivered == 50 {
                    shutdown.raise();
                }
            }
            events.push(e);
        })
        .await
        .unwrap();

    assert!(result.was_interrupted);
    assert_eq!(result.processed, 50);
    assert_eq!(result.batches_processed, 1);
    assert_eq!(h.api.calls(), 1);
    assert!(h.storage.lock_is_free());

    // First batch committed, later candidates untouched
    assert_eq!(h.storage.committed_batches().len(), 1);
    let untouched = h.storage.row("V100").unwrap();
    assert_eq!(untouched.get("title").and_then(|v| v.as_text()), Some("old"));

    // The outcome buffer is a prefix of candidate order
    let delivered_ids: Vec<_> = result.details.iter().map(|d| d.id.clone()).collect();
    assert_eq!(delivered_ids, ids[..50].to_vec());
}

#[tokio::test]
async fn commit_failure_fails_the_batch_and_continues() {
    // 60 candidates = 2 batches; the first commit is rejected
    let ids: Vec<String> = (0..60).map(|i| format!("V{i:03}")).collect();
    let remote: Vec<RemoteVideo> = ids.iter().map(|id| remote_video(id, "new")).collect();
    let stored: Vec<RemoteVideo> = ids.iter().map(|id| remote_video(id, "old")).collect();
    let storage = MockStorage::new(ids.iter().map(String::as_str).collect(), stored_rows(&stored));
    storage.fail_next_commits(1);
    let api = MockApi::new(remote);
    let h = harness(storage, api);

    let (result, _) = run(&h, &zero_delay()).await;

    assert_eq!(result.failed, 50);
    assert_eq!(result.updated, 10);
    assert_eq!(result.batches_processed, 2);
    assert_eq!(result.consecutive_failures, 1);
    assert!(!result.network_instability_warning);

    // Every item of the failed batch reports the commit failure
    for detail in &result.details[..50] {
        assert!(matches!(
            detail.outcome,
            EnrichmentOutcome::Failed {
                kind: tubevault_core::FailureKind::Commit,
                ..
            }
        ));
    }

    // No row from the failed batch is visible; the second batch landed
    assert_eq!(
        h.storage.row("V000").unwrap().get("title").and_then(|v| v.as_text()),
        Some("old")
    );
    assert_eq!(
        h.storage.row("V055").unwrap().get("title").and_then(|v| v.as_text()),
        Some("new")
    );
}

#[tokio::test(start_paused = true)]
async fn throttle_backs_off_and_replays_the_batch_once() {
    let rows = [remote_video("V1", "new")];
    let stored = [remote_video("V1", "old")];
    let storage = MockStorage::new(vec!["V1"], stored_rows(&stored));
    let api = MockApi::new(rows.to_vec()).with_script(vec![ApiScript::Throttled]);
    let h = harness(storage, api);

    let start = Instant::now();
    let (result, events) = run(&h, &zero_delay()).await;

    assert_eq!(result.updated, 1);
    assert_eq!(result.quota_used, 2);
    assert_eq!(h.api.calls(), 2);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Backoff { .. }))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn a_second_throttle_fails_the_whole_batch() {
    let stored = [remote_video("V1", "old")];
    let storage = MockStorage::new(vec!["V1"], stored_rows(&stored));
    let api = MockApi::new(Vec::new())
        .with_script(vec![ApiScript::Throttled, ApiScript::Throttled]);
    let h = harness(storage, api);

    let (result, _) = run(&h, &zero_delay()).await;

    assert_eq!(result.failed, 1);
    assert_eq!(result.quota_used, 2);
    assert!(matches!(
        result.details[0].outcome,
        EnrichmentOutcome::Failed {
            kind: tubevault_core::FailureKind::Throttled,
            ..
        }
    ));
    assert!(h.storage.committed_batches().is_empty());
}

#[tokio::test]
async fn dry_run_diffs_but_commits_nothing() {
    let stored = [remote_video("V1", "old"), remote_video("V2", "kept")];
    let storage = MockStorage::new(vec!["V1", "V2"], stored_rows(&stored));
    let api = MockApi::new(vec![remote_video("V1", "new")]);
    let h = harness(storage, api);

    let options = EnrichOptions {
        dry_run: true,
        ..zero_delay()
    };
    let (result, _) = run(&h, &options).await;

    assert!(result.dry_run);
    assert_eq!(result.updated, 1);
    assert_eq!(result.deleted, 1);
    assert_eq!(result.quota_used, 1);
    assert!(h.storage.committed_batches().is_empty());
    assert!(h.storage.tombstones().is_empty());
    assert_eq!(
        h.storage.row("V1").unwrap().get("title").and_then(|v| v.as_text()),
        Some("old")
    );
}

#[tokio::test]
async fn verbose_runs_collect_id_lists() {
    let stored = [remote_video("V1", "old"), remote_video("V2", "kept")];
    let storage = MockStorage::new(vec!["V1", "V2"], stored_rows(&stored));
    let api = MockApi::new(vec![remote_video("V1", "new")]);
    let h = harness(storage, api);

    let options = EnrichOptions {
        verbose: true,
        ..zero_delay()
    };
    let (result, _) = run(&h, &options).await;

    assert_eq!(result.updated_ids, vec!["V1".to_string()]);
    assert_eq!(result.deleted_ids, vec!["V2".to_string()]);
    assert!(result.failed_ids.is_empty());
}

#[tokio::test]
async fn repeated_batch_failures_latch_the_instability_warning() {
    // 150 candidates = 3 batches, every remote call fails
    let ids: Vec<String> = (0..150).map(|i| format!("V{i:03}")).collect();
    let stored: Vec<RemoteVideo> = ids.iter().map(|id| remote_video(id, "old")).collect();
    let storage = MockStorage::new(ids.iter().map(String::as_str).collect(), stored_rows(&stored));
    let api = MockApi::new(Vec::new()).with_script(vec![
        ApiScript::Transport,
        ApiScript::Transport,
        ApiScript::Transport,
    ]);
    let h = harness(storage, api);

    let (result, _) = run(&h, &zero_delay()).await;

    assert_eq!(result.failed, 150);
    assert_eq!(result.consecutive_failures, 3);
    assert!(result.network_instability_warning);
    assert!(!result.was_interrupted);
}

#[tokio::test]
async fn limit_and_priority_reach_storage() {
    let storage = MockStorage::new(vec!["V1", "V2", "V3"], BTreeMap::new());
    let api = MockApi::new(Vec::new());
    let h = harness(storage, api);

    let options = EnrichOptions {
        limit: Some(2),
        priority: EnrichmentPriority::High,
        ..zero_delay()
    };
    let (result, _) = run(&h, &options).await;

    assert_eq!(result.processed, 2);
    assert_eq!(
        *h.storage.inner.seen_limit.lock().unwrap(),
        Some(Some(2))
    );
    assert_eq!(
        *h.storage.inner.seen_priority.lock().unwrap(),
        Some(EnrichmentPriority::High)
    );
    assert_eq!(result.priority, EnrichmentPriority::High);
}

#[tokio::test]
async fn empty_kind_list_is_a_validation_error() {
    let storage = MockStorage::new(Vec::new(), BTreeMap::new());
    let api = MockApi::new(Vec::new());
    let h = harness(storage, api);

    let err = h
        .coordinator
        .enrich(&[], &zero_delay(), &mut |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn progress_statuses_cover_the_enrichment_protocol() {
    let stored = [remote_video("V1", "old"), remote_video("V2", "kept")];
    let storage = MockStorage::new(vec!["V1", "V2"], stored_rows(&stored));
    let api = MockApi::new(vec![remote_video("V1", "new")]);
    let h = harness(storage, api);

    let (_, events) = run(&h, &zero_delay()).await;

    let statuses: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Item { .. }))
        .map(|e| (e.entity_id().to_string(), e.status_label()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("V1".to_string(), "updated".to_string()),
            ("V2".to_string(), "deleted".to_string()),
        ]
    );
}
