//! The Storage collaborator contract
//!
//! The relational store holding channel, video, and playlist rows lives
//! outside this workspace; the core consumes it through [`ArchiveStore`].
//! All row mutation goes through a [`BatchTransaction`] so a whole
//! enrichment batch is visible atomically or not at all, and concurrent
//! enrichment across processes is excluded by the advisory lock.

use crate::entity::{EntityKind, ImageCandidate, ImageQuality};
use async_trait::async_trait;
use miette::Diagnostic;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Candidate-selection policy for enrichment passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentPriority {
    /// Placeholder rows and rows never enriched, first
    High,
    /// The conservative default set
    #[default]
    Normal,
    /// Every stale row
    All,
}

impl EnrichmentPriority {
    /// Stable lower-case name used in reports and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::All => "all",
        }
    }
}

impl fmt::Display for EnrichmentPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field value in a stored or remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Required text field
    Text(String),
    /// Optional text field
    OptText(Option<String>),
    /// Optional counter
    Count(Option<u64>),
}

impl FieldValue {
    /// The text content, if this is a (present) text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::OptText(opt) => opt.as_deref(),
            Self::Count(_) => None,
        }
    }
}

/// Ordered field name → value map for one entity row. `BTreeMap` keeps
/// diffing and staged updates deterministic.
pub type FieldSet = BTreeMap<&'static str, FieldValue>;

/// The change staged for one entity within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    /// Overwrite the named fields with new values
    Patch(FieldSet),
    /// Record that the remote no longer serves this item
    Tombstone,
}

/// One staged row update, applied as part of a batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpdate {
    /// Which table the row lives in
    pub kind: EntityKind,
    /// The entity's opaque identifier
    pub id: String,
    /// What to write
    pub change: EntityChange,
}

/// Error type surfaced by the Storage collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// The backing store rejected an operation
    #[error("Storage backend error during {operation}: {message}")]
    #[diagnostic(code(tubevault::storage::backend))]
    Backend {
        /// Operation that failed (e.g., "commit", "load")
        operation: String,
        /// Backend-supplied detail
        message: String,
    },
}

impl StorageError {
    /// Create a backend error.
    #[must_use]
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Opaque handle for the single enrichment advisory lock. Returned by a
/// successful acquisition and passed back on release; the core never
/// inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryLockToken(u64);

impl AdvisoryLockToken {
    /// Wrap a backend-assigned lock id.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The backend-assigned lock id.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A staged-update transaction covering exactly one enrichment batch.
///
/// `commit` applies every staged update as one unit: after it resolves,
/// either all staged rows are visible or none is, and a failed commit has
/// already rolled the batch back. `rollback` discards the staged updates
/// explicitly.
#[async_trait]
pub trait BatchTransaction: Send {
    /// Add one row update to the batch.
    fn stage(&mut self, update: StagedUpdate);

    /// Number of updates staged so far.
    fn staged_count(&self) -> usize;

    /// Apply the batch atomically.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard the batch.
    async fn rollback(self: Box<Self>);
}

/// The Storage collaborator: candidate listing, row loading, batched
/// mutation, and the advisory enrichment lock.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Channels whose avatar should be cached, in storage's chosen order.
    async fn channels_needing_avatar(
        &self,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ImageCandidate>>;

    /// Videos with a resolvable thumbnail URL for `quality`, in storage's
    /// chosen order.
    async fn videos_needing_thumbnail(
        &self,
        quality: ImageQuality,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ImageCandidate>>;

    /// IDs of rows eligible for enrichment under the given policy, in
    /// priority order.
    async fn enrichment_candidates(
        &self,
        kind: EntityKind,
        priority: EnrichmentPriority,
        limit: Option<usize>,
    ) -> StorageResult<Vec<String>>;

    /// Current field values for the given rows. IDs unknown to storage
    /// are simply absent from the result.
    async fn load_fields(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> StorageResult<BTreeMap<String, FieldSet>>;

    /// Open a staged-update transaction for one batch.
    fn begin_batch(&self) -> StorageResult<Box<dyn BatchTransaction>>;

    /// Try to take the named advisory lock without waiting. `None` means
    /// another process holds it.
    fn try_acquire_advisory_lock(&self, name: &str) -> StorageResult<Option<AdvisoryLockToken>>;

    /// Return a previously acquired lock. Infallible by contract: a
    /// release that finds the lock already gone is a no-op.
    fn release_advisory_lock(&self, token: AdvisoryLockToken);
}
