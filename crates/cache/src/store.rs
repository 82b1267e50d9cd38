//! The on-disk image cache: atomic writes, negative markers, crash safety
//!
//! For any key at most one of the content file and its `.missing` sibling
//! exists after a successful operation. `store` renames the new content
//! into place before deleting a marker, so a crash between the two steps
//! leaves a valid cache hit; the reverse order could leave a key that is
//! both present and marked missing.

use crate::error::{Error, Result};
use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use tubevault_core::{CacheConfig, fsatomic};
use walkdir::WalkDir;

/// The on-disk state of one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Content bytes are cached
    Present {
        /// Content size in bytes
        size: u64,
        /// Content file modification time
        modified: DateTime<Utc>,
    },
    /// A previous attempt failed; do not silently retry unless asked
    Missing {
        /// Why the image could not be fetched
        reason: String,
        /// When the failure was recorded
        recorded_at: DateTime<Utc>,
    },
    /// Neither content nor marker exists
    Absent,
}

impl CacheEntry {
    /// Whether content bytes are cached.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Whether a negative marker is recorded.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// Payload of a `.missing` marker file.
#[derive(Debug, Serialize, Deserialize)]
struct MissingMarker {
    reason: String,
    recorded_at: DateTime<Utc>,
}

/// Content-addressed image cache rooted at `<cache_dir>/images`.
///
/// The store owns its subtree exclusively for the duration of a run;
/// directory structure is created lazily on first write.
#[derive(Debug, Clone)]
pub struct CacheStore {
    images_root: PathBuf,
}

impl CacheStore {
    /// Create a store over the image subtree of the given config. No
    /// directories are created until the first write.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            images_root: config.images_dir(),
        }
    }

    /// Root of the subtree this store owns.
    #[must_use]
    pub fn images_root(&self) -> &Path {
        &self.images_root
    }

    fn content_path(&self, key: &CacheKey) -> PathBuf {
        self.images_root.join(key.rel_path())
    }

    fn marker_path(&self, key: &CacheKey) -> PathBuf {
        self.images_root.join(key.marker_rel_path())
    }

    /// Read the on-disk state for a key. A non-existent directory reads as
    /// [`CacheEntry::Absent`] without error.
    pub fn lookup(&self, key: &CacheKey) -> Result<CacheEntry> {
        let content = self.content_path(key);
        match fs::metadata(&content) {
            Ok(meta) if meta.is_file() => {
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                return Ok(CacheEntry::Present {
                    size: meta.len(),
                    modified,
                });
            }
            Ok(_) => {
                return Err(Error::invalid_key(format!(
                    "{} exists but is not a regular file",
                    content.display()
                )));
            }
            Err(e) if path_absent(&e) => {}
            Err(e) => return Err(Error::io(e, &content, "metadata")),
        }

        let marker = self.marker_path(key);
        match fs::read(&marker) {
            Ok(bytes) => Ok(parse_marker(&bytes, &marker)),
            Err(e) if path_absent(&e) => Ok(CacheEntry::Absent),
            Err(e) => Err(Error::io(e, &marker, "read")),
        }
    }

    /// Persist content bytes for a key. The bytes land atomically and any
    /// `.missing` marker is removed afterwards (rename before delete).
    pub fn store(&self, key: &CacheKey, bytes: &[u8]) -> Result<CacheEntry> {
        let content = self.content_path(key);
        fsatomic::write_atomic(&content, bytes)?;

        let marker = self.marker_path(key);
        if let Err(e) = fs::remove_file(&marker) {
            if !path_absent(&e) {
                return Err(Error::io(e, &marker, "remove"));
            }
        }

        debug!(key = %key, size = bytes.len(), "Stored cache entry");
        Ok(CacheEntry::Present {
            size: bytes.len() as u64,
            modified: Utc::now(),
        })
    }

    /// Record that a fetch failed. A no-op when content exists: a key is
    /// never both present and missing.
    pub fn mark_missing(&self, key: &CacheKey, reason: &str) -> Result<CacheEntry> {
        if let entry @ CacheEntry::Present { .. } = self.lookup(key)? {
            debug!(key = %key, "Content present; not recording missing marker");
            return Ok(entry);
        }

        let marker = MissingMarker {
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        let body = serde_json::to_vec(&marker)
            .map_err(|e| Error::serialization(format!("failed to encode marker: {e}")))?;
        fsatomic::write_atomic(&self.marker_path(key), &body)?;

        debug!(key = %key, reason, "Recorded missing marker");
        Ok(CacheEntry::Missing {
            reason: marker.reason,
            recorded_at: marker.recorded_at,
        })
    }

    /// Remove stray temp siblings older than `older_than`, left behind by
    /// writes that failed or crashed mid-flight. Returns the count
    /// removed.
    pub fn sweep_stale_temp_files(&self, older_than: Duration) -> Result<usize> {
        if !self.images_root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in WalkDir::new(&self.images_root)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !fsatomic::is_temp_sibling(path) {
                continue;
            }
            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age >= older_than);
            if stale {
                match fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) if path_absent(&e) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to sweep temp file"),
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Swept stale temp files");
        }
        Ok(removed)
    }
}

fn path_absent(err: &std::io::Error) -> bool {
    // NotADirectory covers a path component that exists as a file
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn parse_marker(bytes: &[u8], path: &Path) -> CacheEntry {
    match serde_json::from_slice::<MissingMarker>(bytes) {
        Ok(marker) => CacheEntry::Missing {
            reason: marker.reason,
            recorded_at: marker.recorded_at,
        },
        Err(e) => {
            // Pre-JSON markers were zero-byte files; treat any unreadable
            // payload the same way rather than failing the lookup
            debug!(path = %path.display(), error = %e, "Unparseable missing marker");
            CacheEntry::Missing {
                reason: "unknown".to_string(),
                recorded_at: Utc::now(),
            }
        }
    }
}
