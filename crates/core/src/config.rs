//! Immutable per-process settings for the cache and enrichment core

use crate::entity::ImageQuality;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-request timeout for remote calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retry budget for transport errors on a single item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff after a rate-limit signal.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Default ceiling for exponential backoff growth.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Immutable settings for one process, created once at startup and shared
/// read-only by every run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the on-disk cache; images live under
    /// `<cache_dir>/images`.
    pub cache_dir: PathBuf,
    /// Per-request timeout for remote HTTP calls
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Transport-error retry budget per item
    pub max_retries: u32,
    /// Initial backoff after a rate-limit signal
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
    /// Ceiling for exponential backoff growth
    #[serde(with = "duration_secs")]
    pub backoff_cap: Duration,
    /// User-agent header sent with every remote request
    pub user_agent: String,
    /// Thumbnail quality used when the caller does not pick one
    pub default_quality: ImageQuality,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".tubevault/cache"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            user_agent: concat!("tubevault/", env!("CARGO_PKG_VERSION")).to_string(),
            default_quality: ImageQuality::MqDefault,
        }
    }
}

impl CacheConfig {
    /// Create a config rooted at the given cache directory with defaults
    /// for everything else.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Root of the image subtree owned by the cache store.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }

    /// Directory holding channel avatars.
    #[must_use]
    pub fn channels_dir(&self) -> PathBuf {
        self.images_dir().join("channels")
    }

    /// Directory holding video thumbnails for one quality variant.
    #[must_use]
    pub fn videos_dir(&self, quality: ImageQuality) -> PathBuf {
        self.images_dir().join("videos").join(quality.as_str())
    }

    /// Reject configurations no run could operate under.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero request timeout, a backoff cap
    /// below the base, or an empty user-agent.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::validation("request_timeout must be positive"));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(Error::validation(format!(
                "backoff_cap ({:?}) must be at least backoff_base ({:?})",
                self.backoff_cap, self.backoff_base
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::validation("user_agent must not be empty"));
        }
        Ok(())
    }
}

/// Serde helper: durations as (fractional) seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

impl CacheConfig {
    /// Convenience used by tests and composition roots.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the transport retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Override the backoff window.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }
}
