//! The report schema and its atomic persistence

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use tubevault_core::fsatomic;
use tubevault_enrich::{EnrichmentOutcome, RunResult};
use uuid::Uuid;

/// Aggregate counts for one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    /// Items with a delivered outcome
    pub processed: u64,
    /// Items updated
    pub updated: u64,
    /// Items the remote no longer serves
    pub deleted: u64,
    /// Items with nothing to change
    pub skipped: u64,
    /// Items that failed
    pub errors: u64,
    /// Batches that produced outcomes
    pub batches: u64,
    /// Remote calls made
    pub quota_used: u64,
}

/// One detail row per item outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentDetail {
    /// The item's opaque identifier
    pub id: String,
    /// One of `updated`, `deleted`, `skipped`, `error`
    pub status: String,
    /// Previous title, when the title changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    /// New title, when the title changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
    /// Failure detail for `error` rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present (and true) on dry-run outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// The persisted artifact of one enrichment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    /// When the run started
    pub timestamp: DateTime<Utc>,
    /// Correlates the file with the in-process run
    pub run_id: Uuid,
    /// The candidate-selection policy the run used
    pub priority: String,
    /// Aggregate counts
    pub summary: EnrichmentSummary,
    /// One row per item outcome, in delivery order
    pub details: Vec<EnrichmentDetail>,
}

impl EnrichmentReport {
    /// Build the report for a finished run.
    #[must_use]
    pub fn from_run(run: &RunResult) -> Self {
        let dry_run = run.dry_run.then_some(true);
        let details = run
            .details
            .iter()
            .map(|item| {
                let (status, old, new, error) = match &item.outcome {
                    EnrichmentOutcome::Updated {
                        old_title,
                        new_title,
                        ..
                    } => ("updated", old_title.clone(), new_title.clone(), None),
                    EnrichmentOutcome::Deleted => ("deleted", None, None, None),
                    EnrichmentOutcome::Skipped { .. } => ("skipped", None, None, None),
                    EnrichmentOutcome::Failed { kind, message } => (
                        "error",
                        None,
                        None,
                        Some(format!("{kind}: {message}")),
                    ),
                };
                EnrichmentDetail {
                    id: item.id.clone(),
                    status: status.to_string(),
                    old,
                    new,
                    error,
                    dry_run,
                }
            })
            .collect();

        Self {
            timestamp: run.started_at,
            run_id: run.run_id,
            priority: run.priority.to_string(),
            summary: EnrichmentSummary {
                processed: run.processed,
                updated: run.updated,
                deleted: run.deleted,
                skipped: run.skipped,
                errors: run.failed,
                batches: run.batches_processed,
                quota_used: run.quota_used,
            },
            details,
        }
    }
}

/// The default report location: `<exports>/enrichment-YYYYMMDD-HHMMSS.json`.
#[must_use]
pub fn default_report_path(exports_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    exports_dir.join(format!("enrichment-{}.json", at.format("%Y%m%d-%H%M%S")))
}

/// Persist a report as pretty-printed UTF-8 JSON. Parent directories are
/// created; the write is atomic (temp sibling + fsync + rename).
pub fn write_report(report: &EnrichmentReport, path: &Path) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(report)
        .map_err(|e| Error::serialization(format!("failed to encode report: {e}")))?;
    body.push(b'\n');
    fsatomic::write_atomic(path, &body)?;
    info!(path = %path.display(), details = report.details.len(), "Wrote enrichment report");
    Ok(())
}
