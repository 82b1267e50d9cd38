//! Cache statistics and idempotent purge

use crate::error::{Error, Result};
use crate::key::{ImageScope, MISSING_SUFFIX};
use crate::store::CacheStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::info;
use tubevault_core::fsatomic;
use walkdir::WalkDir;

/// One walk's worth of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached channel avatars
    pub channel_count: u64,
    /// Cached video thumbnails (all qualities)
    pub video_count: u64,
    /// Channel keys with a negative marker
    pub channel_missing_count: u64,
    /// Video keys with a negative marker
    pub video_missing_count: u64,
    /// Total size of cached content bytes
    pub total_size_bytes: u64,
    /// Modification time of the oldest content file
    pub oldest_file: Option<DateTime<Utc>>,
    /// Modification time of the newest content file
    pub newest_file: Option<DateTime<Utc>>,
}

impl CacheStore {
    /// Walk the image subtree once and summarize it. A missing subtree
    /// yields all-zero stats.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let root = self.images_root();
        if !root.exists() {
            return Ok(stats);
        }

        let channels_root = root.join("channels");
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() || fsatomic::is_temp_sibling(entry.path()) {
                continue;
            }
            let under_channels = is_under(entry.path(), &channels_root);
            let name = entry.file_name().to_string_lossy();

            if name.ends_with(MISSING_SUFFIX) {
                if under_channels {
                    stats.channel_missing_count += 1;
                } else {
                    stats.video_missing_count += 1;
                }
                continue;
            }

            if under_channels {
                stats.channel_count += 1;
            } else {
                stats.video_count += 1;
            }
            if let Ok(meta) = entry.metadata() {
                stats.total_size_bytes += meta.len();
                if let Ok(modified) = meta.modified() {
                    let modified = DateTime::<Utc>::from(modified);
                    if stats.oldest_file.is_none_or(|t| modified < t) {
                        stats.oldest_file = Some(modified);
                    }
                    if stats.newest_file.is_none_or(|t| modified > t) {
                        stats.newest_file = Some(modified);
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Delete the subtree covered by `scope`, returning the bytes freed
    /// (content and marker files both count). Idempotent: purging an
    /// already-empty scope frees 0 bytes.
    pub fn purge(&self, scope: ImageScope) -> Result<u64> {
        let root = self.images_root().to_path_buf();
        let target = match scope {
            ImageScope::Channels => root.join("channels"),
            ImageScope::Videos => root.join("videos"),
            ImageScope::All => root,
        };

        let freed = subtree_size(&target);
        match fs::remove_dir_all(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io(e, &target, "remove_dir_all")),
        }

        info!(scope = %scope, bytes_freed = freed, "Purged image cache");
        Ok(freed)
    }
}

fn is_under(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}

fn subtree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
