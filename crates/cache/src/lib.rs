//! Content-addressed image caching for tubevault
//!
//! This crate owns the on-disk image subtree:
//! - deterministic cache keys per entity kind and thumbnail quality
//! - atomic content writes (temp sibling + fsync + rename)
//! - explicit negative caching via `.missing` sibling markers
//! - single-walk statistics and idempotent purge
//!
//! # Crash safety
//!
//! No file is written in place. A crash mid-`store` leaves either the old
//! state or the new content plus a soon-to-be-deleted marker, never a
//! partially written file under a final name. Stray temp siblings from
//! interrupted writes are removed by the startup sweep.

mod error;
mod key;
mod stats;
mod store;

pub use error::{Error, Result};
pub use key::{CacheKey, ImageScope, MISSING_SUFFIX};
pub use stats::CacheStats;
pub use store::{CacheEntry, CacheStore};
