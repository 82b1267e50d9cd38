//! The Remote API collaborator contract
//!
//! Batched metadata lookup against the rate-limited remote platform API.
//! Absent items in a batch response signal deletion; a rate-limit error is
//! distinguishable from generic transport failure so the governor can open
//! a backoff window instead of burning the retry budget.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

/// The remote API's per-call id limit; enrichment batches are sized to it.
pub const BATCH_SIZE: usize = 50;

/// Error type surfaced by the Remote API collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum ApiError {
    /// The remote signalled rate limiting (HTTP 429 or quota exhaustion)
    #[error("Remote API rate limit exceeded")]
    #[diagnostic(
        code(tubevault::remote::throttled),
        help("The run will back off and replay the batch once")
    )]
    Throttled,

    /// Timeout, connection failure, or unexpected server error
    #[error("Remote API transport error: {message}")]
    #[diagnostic(code(tubevault::remote::transport))]
    Transport {
        /// Transport-level detail
        message: String,
    },
}

impl ApiError {
    /// Create a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether this is the rate-limit signal.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled)
    }
}

/// Result type for remote API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Channel statistics counters. All optional: the remote hides some
/// counters per channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelStatistics {
    /// Subscriber count, hidden for some channels
    pub subscriber_count: Option<u64>,
    /// Number of public videos
    pub video_count: Option<u64>,
    /// Lifetime view count
    pub view_count: Option<u64>,
}

/// One channel as returned by a batch lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChannel {
    /// Opaque stable channel id
    pub id: String,
    /// Channel title
    pub title: String,
    /// Channel description
    #[serde(default)]
    pub description: String,
    /// ISO 3166 country code, if declared
    #[serde(default)]
    pub country: Option<String>,
    /// BCP-47 language tag, if declared; case not normalized by the remote
    #[serde(default)]
    pub default_language: Option<String>,
    /// Vanity handle, if assigned
    #[serde(default)]
    pub custom_url: Option<String>,
    /// Public counters
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

/// Video statistics counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoStatistics {
    /// View count
    pub view_count: Option<u64>,
    /// Like count, hidden for some videos
    pub like_count: Option<u64>,
    /// Comment count, absent when comments are disabled
    pub comment_count: Option<u64>,
}

/// One video as returned by a batch lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVideo {
    /// Opaque stable video id
    pub id: String,
    /// Video title
    pub title: String,
    /// Video description
    #[serde(default)]
    pub description: String,
    /// BCP-47 language tag, if declared; case not normalized by the remote
    #[serde(default)]
    pub default_language: Option<String>,
    /// Remote category id, if assigned
    #[serde(default)]
    pub category_id: Option<String>,
    /// Public counters
    #[serde(default)]
    pub statistics: VideoStatistics,
}

/// One playlist as returned by a batch lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlaylist {
    /// Opaque stable playlist id
    pub id: String,
    /// Playlist title
    pub title: String,
    /// Playlist description
    #[serde(default)]
    pub description: String,
    /// Number of items in the playlist
    #[serde(default)]
    pub item_count: Option<u64>,
}

/// The Remote API collaborator: batched metadata lookup. Each call costs
/// one quota unit; items absent from an otherwise successful response no
/// longer exist remotely.
#[async_trait]
pub trait MetadataApi: Send + Sync {
    /// Look up up to [`BATCH_SIZE`] channels by id.
    async fn channels_by_ids(&self, ids: &[String]) -> ApiResult<Vec<RemoteChannel>>;

    /// Look up up to [`BATCH_SIZE`] videos by id.
    async fn videos_by_ids(&self, ids: &[String]) -> ApiResult<Vec<RemoteVideo>>;

    /// Look up up to [`BATCH_SIZE`] playlists by id.
    async fn playlists_by_ids(&self, ids: &[String]) -> ApiResult<Vec<RemotePlaylist>>;
}
