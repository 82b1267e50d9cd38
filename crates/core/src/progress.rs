//! Structured progress events for warm and enrichment runs
//!
//! Progress is delivered through a synchronous callback, one event per
//! item plus out-of-band backoff notifications. The variants here replace
//! the legacy in-band string protocol; [`ProgressEvent::entity_id`] and
//! [`ProgressEvent::status_label`] render that protocol (including the
//! literal `__backoff__` sentinel) for string-typed consumers such as
//! terminal renderers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel entity id carried by backoff notifications in the string
/// rendering of the progress stream.
pub const BACKOFF_SENTINEL: &str = "__backoff__";

/// Consecutive transport failures after which a run sets its
/// network-instability warning.
pub const NETWORK_INSTABILITY_THRESHOLD: u32 = 3;

/// Item-level failure kinds, the closed set distinguished by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote returned 404/410 for a URL or omitted an id from a batch
    NotFound,
    /// Rate-limit signal persisted past the single replay
    Throttled,
    /// Timeout, connection error, or unexpected 5xx
    Transport,
    /// 200 response whose payload failed validation
    Content,
    /// Storage batch commit rejected
    Commit,
    /// Local field mapping/validation error for one item
    Mapping,
    /// Storage read or cache write failed for one item or batch
    Storage,
}

impl FailureKind {
    /// Stable snake_case name used in status strings and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Transport => "transport",
            Self::Content => "content",
            Self::Commit => "commit",
            Self::Mapping => "mapping",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item status across both pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Image fetched and stored
    Downloaded,
    /// Cache miss that a real run would download
    DryRun,
    /// Nothing to do for this item
    Skipped {
        /// True when the skip came from a `.missing` marker rather than a
        /// cache hit
        negative_hit: bool,
    },
    /// The entity row has no resolvable image URL
    NoUrl,
    /// The considered-item cap was reached at this candidate
    LimitReached,
    /// Enrichment changed at least one field
    Updated,
    /// Remote no longer serves this item
    Deleted,
    /// Enrichment found nothing to change
    Unchanged,
    /// Item-level failure
    Failed(FailureKind),
}

impl ItemStatus {
    /// The legacy status string for this status.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Downloaded => "downloaded".to_string(),
            Self::DryRun => "dry_run".to_string(),
            Self::Skipped {
                negative_hit: false,
            } => "skipped".to_string(),
            Self::Skipped { negative_hit: true } => "skipped:missing".to_string(),
            Self::NoUrl => "no_url".to_string(),
            Self::LimitReached => "limit_reached".to_string(),
            Self::Updated => "updated".to_string(),
            Self::Deleted => "deleted".to_string(),
            Self::Unchanged => "skipped:unchanged".to_string(),
            Self::Failed(kind) => format!("failed:{kind}"),
        }
    }

    /// Whether this status counts as a failure in run totals.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One event in the progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Outcome for one entity, delivered in candidate order
    Item {
        /// The entity's opaque identifier
        id: String,
        /// What happened to it
        status: ItemStatus,
    },
    /// The governor opened a backoff window; does not advance item counts
    Backoff {
        /// The delay now in force
        delay: Duration,
    },
}

impl ProgressEvent {
    /// Build an item event.
    #[must_use]
    pub fn item(id: impl Into<String>, status: ItemStatus) -> Self {
        Self::Item {
            id: id.into(),
            status,
        }
    }

    /// The entity id in the legacy string protocol; backoff events carry
    /// the sentinel.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Item { id, .. } => id,
            Self::Backoff { .. } => BACKOFF_SENTINEL,
        }
    }

    /// The status string in the legacy protocol.
    #[must_use]
    pub fn status_label(&self) -> String {
        match self {
            Self::Item { status, .. } => status.label(),
            Self::Backoff { .. } => BACKOFF_SENTINEL.to_string(),
        }
    }
}

/// The synchronous progress callback contract. The pipeline invokes it
/// inline and never yields inside it; implementations must be cheap.
pub type ProgressSink<'a> = &'a mut dyn FnMut(ProgressEvent);
