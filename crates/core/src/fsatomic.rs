//! Atomic file persistence: temp sibling + fsync + rename
//!
//! Every file the core persists (cache images, `.missing` markers,
//! enrichment reports) goes through [`write_atomic`] so that no partially
//! written file is ever visible under its final name.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix shared by all in-flight temp siblings.
pub const TEMP_SUFFIX: &str = ".tmp";

/// The temp sibling used while writing `target`. Lives in the same
/// directory so the final rename never crosses a filesystem boundary.
#[must_use]
pub fn temp_sibling(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map_or_else(|| "unnamed".to_string(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{file_name}.{}{TEMP_SUFFIX}", std::process::id()))
}

/// Write `bytes` to `target` atomically: parent directories are created,
/// the bytes land in a temp sibling, the sibling is fsynced and renamed
/// onto the final path.
///
/// On failure the temp sibling is left behind for a later sweep and the
/// typed error names the step that failed.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::validation(format!("{} has no parent directory", target.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;

    let tmp = temp_sibling(target);
    let mut file = fs::File::create(&tmp).map_err(|e| Error::io(e, &tmp, "create"))?;
    file.write_all(bytes).map_err(|e| Error::io(e, &tmp, "write"))?;
    file.sync_all().map_err(|e| Error::io(e, &tmp, "sync"))?;
    drop(file);

    fs::rename(&tmp, target).map_err(|e| Error::io(e, target, "rename"))?;
    Ok(())
}

/// Whether `path` names one of our temp siblings.
#[must_use]
pub fn is_temp_sibling(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}
