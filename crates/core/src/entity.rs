//! Entity references and thumbnail quality variants
//!
//! An [`EntityRef`] is the unit of work for the image warm pipeline: either
//! a channel avatar or a video thumbnail at a specific quality level. IDs
//! are opaque stable identifiers assigned by the remote platform.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video thumbnail quality variants, a closed set.
///
/// The string forms match the remote platform's thumbnail path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    /// 120x90 baseline thumbnail
    Default,
    /// 320x180 medium quality
    #[default]
    MqDefault,
    /// 480x360 high quality
    HqDefault,
    /// 640x480 standard definition
    SdDefault,
    /// 1280x720 maximum resolution
    MaxResDefault,
}

impl ImageQuality {
    /// All quality variants in ascending resolution order.
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::MqDefault,
        Self::HqDefault,
        Self::SdDefault,
        Self::MaxResDefault,
    ];

    /// The string form used in cache paths and remote URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::MqDefault => "mqdefault",
            Self::HqDefault => "hqdefault",
            Self::SdDefault => "sddefault",
            Self::MaxResDefault => "maxresdefault",
        }
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown thumbnail quality {s:?}; expected one of: {}",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

/// Kinds of entities the archive stores and enriches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A channel row
    Channel,
    /// A video row
    Video,
    /// A playlist row
    Playlist,
}

impl EntityKind {
    /// Lower-case noun used in logs and report output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Video => "video",
            Self::Playlist => "playlist",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to one cacheable image: the warm pipeline's unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A channel avatar
    Channel {
        /// Opaque stable channel identifier
        id: String,
    },
    /// A video thumbnail at a specific quality
    Video {
        /// Opaque stable video identifier
        id: String,
        /// Thumbnail quality variant
        quality: ImageQuality,
    },
}

impl EntityRef {
    /// The entity's opaque identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Channel { id } | Self::Video { id, .. } => id,
        }
    }

    /// Validate that the identifier is safe to embed in a filesystem path.
    ///
    /// Remote platform IDs are drawn from `[A-Za-z0-9_-]`; anything else is
    /// rejected so a hostile ID cannot escape the cache subtree.
    pub fn validate_id(&self) -> Result<()> {
        let id = self.id();
        if id.is_empty() {
            return Err(Error::validation("entity id must not be empty"));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::validation(format!(
                "entity id {id:?} contains invalid character {bad:?}"
            )));
        }
        Ok(())
    }
}

/// One candidate row from storage for the warm pipeline: an entity that
/// should have a cached image, together with its resolved source URL (or
/// `None` when the row has no URL to fetch from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// The entity to warm
    pub entity: EntityRef,
    /// Resolved image URL, if the row has one
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_round_trips_through_strings() {
        for quality in ImageQuality::ALL {
            let parsed: ImageQuality = quality.as_str().parse().unwrap();
            assert_eq!(parsed, quality);
        }
    }

    #[test]
    fn unknown_quality_is_a_validation_error() {
        let err = "ultrahd".parse::<ImageQuality>().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn default_quality_is_mqdefault() {
        assert_eq!(ImageQuality::default(), ImageQuality::MqDefault);
    }

    #[test]
    fn valid_ids_pass_validation() {
        let entity = EntityRef::Channel {
            id: "UC_x5XG1OV2P6uZZ5FSM9Ttw".to_string(),
        };
        entity.validate_id().unwrap();
    }

    #[test]
    fn path_traversal_ids_are_rejected() {
        for id in ["../../etc/passwd", "a/b", "", "id with space"] {
            let entity = EntityRef::Video {
                id: id.to_string(),
                quality: ImageQuality::MqDefault,
            };
            assert!(entity.validate_id().is_err(), "id {id:?} should be rejected");
        }
    }
}
