//! Shared core for the tubevault cache and enrichment engine
//!
//! This crate holds everything both pipelines lean on:
//! - the entity model and per-process [`CacheConfig`]
//! - the [`RateGovernor`] pacing remote calls with 429-triggered backoff
//! - the [`ShutdownFlag`] for cooperative cancellation
//! - structured [`ProgressEvent`]s and the synchronous callback contract
//! - the collaborator seams ([`ArchiveStore`], [`MetadataApi`]) behind
//!   which the relational store and the remote platform API live
//! - the atomic temp-rename write discipline every persisted file uses
//!
//! The core runs one logical pipeline per run on a single-threaded
//! cooperative scheduler; nothing here spawns per-item tasks.

mod config;
mod entity;
mod error;
pub mod fsatomic;
mod governor;
mod progress;
pub mod remote;
mod shutdown;
pub mod storage;

pub use config::{
    CacheConfig, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use entity::{EntityKind, EntityRef, ImageCandidate, ImageQuality};
pub use error::{Error, Result};
pub use governor::{Permit, RateGovernor};
pub use progress::{
    BACKOFF_SENTINEL, FailureKind, ItemStatus, NETWORK_INSTABILITY_THRESHOLD, ProgressEvent,
    ProgressSink,
};
pub use remote::{ApiError, ApiResult, MetadataApi};
pub use shutdown::{ShutdownFlag, install_signal_handlers};
pub use storage::{
    AdvisoryLockToken, ArchiveStore, BatchTransaction, EnrichmentPriority, StorageError,
    StorageResult,
};
