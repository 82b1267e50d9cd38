//! Cache keys: deterministic relative paths per entity
//!
//! A [`CacheKey`] maps an [`EntityRef`] to its place in the image subtree:
//! `channels/<id>.jpg` for avatars, `videos/<quality>/<id>.jpg` for
//! thumbnails. The kind prefix and the per-quality namespace keep keys
//! collision-free across kinds and variants. The `.jpg` extension is
//! structural, not semantic: PNG payloads are written under it too.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tubevault_core::EntityRef;

/// Suffix of negative-cache marker files, appended to the content name.
pub const MISSING_SUFFIX: &str = ".missing";

/// Which part of the image subtree an operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageScope {
    /// Channel avatars only
    Channels,
    /// Video thumbnails only (all qualities)
    Videos,
    /// The whole image subtree
    All,
}

impl ImageScope {
    /// Lower-case name as accepted on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channels => "channels",
            Self::Videos => "videos",
            Self::All => "all",
        }
    }

    /// Whether the scope covers channel avatars.
    #[must_use]
    pub fn includes_channels(self) -> bool {
        matches!(self, Self::Channels | Self::All)
    }

    /// Whether the scope covers video thumbnails.
    #[must_use]
    pub fn includes_videos(self) -> bool {
        matches!(self, Self::Videos | Self::All)
    }
}

impl fmt::Display for ImageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "channels" => Ok(Self::Channels),
            "videos" => Ok(Self::Videos),
            "all" => Ok(Self::All),
            other => Err(Error::invalid_key(format!(
                "unknown image scope {other:?}; expected channels, videos, or all"
            ))),
        }
    }
}

/// A deterministic relative path for one cacheable image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    rel: PathBuf,
}

impl CacheKey {
    /// Derive the key for an entity. Fails when the entity id is unsafe to
    /// embed in a path.
    pub fn for_entity(entity: &EntityRef) -> Result<Self> {
        entity.validate_id()?;
        let rel = match entity {
            EntityRef::Channel { id } => Path::new("channels").join(format!("{id}.jpg")),
            EntityRef::Video { id, quality } => Path::new("videos")
                .join(quality.as_str())
                .join(format!("{id}.jpg")),
        };
        Ok(Self { rel })
    }

    /// Relative path of the content file under the image root.
    #[must_use]
    pub fn rel_path(&self) -> &Path {
        &self.rel
    }

    /// Relative path of the sibling negative-cache marker.
    #[must_use]
    pub fn marker_rel_path(&self) -> PathBuf {
        let mut name = self
            .rel
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        name.push_str(MISSING_SUFFIX);
        self.rel.with_file_name(name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rel.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubevault_core::ImageQuality;

    #[test]
    fn channel_keys_live_under_channels() {
        let key = CacheKey::for_entity(&EntityRef::Channel {
            id: "UC123".to_string(),
        })
        .unwrap();
        assert_eq!(key.rel_path(), Path::new("channels/UC123.jpg"));
        assert_eq!(
            key.marker_rel_path(),
            Path::new("channels/UC123.jpg.missing")
        );
    }

    #[test]
    fn video_keys_are_namespaced_by_quality() {
        let key = CacheKey::for_entity(&EntityRef::Video {
            id: "abc-_123".to_string(),
            quality: ImageQuality::MaxResDefault,
        })
        .unwrap();
        assert_eq!(
            key.rel_path(),
            Path::new("videos/maxresdefault/abc-_123.jpg")
        );
    }

    #[test]
    fn same_id_in_different_kinds_never_collides() {
        let channel = CacheKey::for_entity(&EntityRef::Channel {
            id: "same".to_string(),
        })
        .unwrap();
        let video = CacheKey::for_entity(&EntityRef::Video {
            id: "same".to_string(),
            quality: ImageQuality::Default,
        })
        .unwrap();
        assert_ne!(channel, video);
    }

    #[test]
    fn hostile_ids_are_rejected() {
        let err = CacheKey::for_entity(&EntityRef::Channel {
            id: "../escape".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }

    #[test]
    fn scope_parsing_round_trips() {
        for scope in [ImageScope::Channels, ImageScope::Videos, ImageScope::All] {
            assert_eq!(scope.as_str().parse::<ImageScope>().unwrap(), scope);
        }
        assert!("thumbnails".parse::<ImageScope>().is_err());
    }
}
