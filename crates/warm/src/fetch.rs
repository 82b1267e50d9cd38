//! Bounded-timeout image fetching over HTTP
//!
//! [`ImageFetcher`] is the seam the pipeline drives; [`HttpImageFetcher`]
//! is the production implementation. Classification is exhaustive: every
//! response lands in exactly one of the four fetch error kinds or
//! succeeds with validated image bytes.

use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use miette::Diagnostic;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error as ThisError;
use tracing::debug;
use tubevault_core::{CacheConfig, FailureKind};

/// Content types accepted for cached images. Anything else is a content
/// error even on HTTP 200.
pub const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// How one fetch attempt failed.
#[derive(Debug, ThisError, Diagnostic)]
pub enum FetchError {
    /// The remote no longer serves this URL (404/410)
    #[error("image not found (HTTP {status})")]
    #[diagnostic(code(tubevault::warm::fetch::not_found))]
    NotFound {
        /// The HTTP status received
        status: u16,
    },

    /// The remote signalled rate limiting (429)
    #[error("remote rate limit hit")]
    #[diagnostic(code(tubevault::warm::fetch::throttled))]
    Throttled,

    /// Timeout, connection failure, or unexpected status
    #[error("transport error: {message}")]
    #[diagnostic(code(tubevault::warm::fetch::transport))]
    Transport {
        /// Transport-level detail
        message: String,
    },

    /// HTTP 200 with a payload that failed validation
    #[error("content rejected: {message}")]
    #[diagnostic(code(tubevault::warm::fetch::content))]
    Content {
        /// What was wrong with the payload
        message: String,
    },
}

impl FetchError {
    /// The item-level failure kind this error maps to.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Throttled => FailureKind::Throttled,
            Self::Transport { .. } => FailureKind::Transport,
            Self::Content { .. } => FailureKind::Content,
        }
    }
}

/// A validated image payload.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// The image bytes
    pub bytes: Bytes,
    /// The validated content type (lower-case, parameters stripped)
    pub content_type: String,
}

/// The image-fetch seam the warm pipeline drives.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch one image with the configured timeout.
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedImage, FetchError>;
}

/// Production fetcher over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Build a fetcher with the configured user-agent and per-request
    /// timeout.
    pub fn new(config: &CacheConfig) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::ClientSetup {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedImage, FetchError> {
        debug!(url = %url, "Fetching image");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(';').next())
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
                    return Err(FetchError::Content {
                        message: format!("unexpected content type {content_type:?}"),
                    });
                }
                let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
                    message: e.to_string(),
                })?;
                if bytes.is_empty() {
                    return Err(FetchError::Content {
                        message: "zero-byte body".to_string(),
                    });
                }
                Ok(FetchedImage {
                    bytes,
                    content_type,
                })
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound {
                status: response.status().as_u16(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::Throttled),
            status => Err(FetchError::Transport {
                message: format!("unexpected HTTP status {status}"),
            }),
        }
    }
}
