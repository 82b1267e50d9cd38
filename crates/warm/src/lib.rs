//! Rate-limited image cache warming for tubevault
//!
//! A warm pass walks the candidate entities storage yields, resolves each
//! image URL, checks the on-disk cache, and downloads misses under the
//! rate governor's pacing — backing off exponentially on 429s, retrying
//! transport errors within a bounded budget, and recording `.missing`
//! markers for permanent failures. Progress streams through the
//! synchronous callback contract; interruption is cooperative and loses
//! at most the item in flight.

mod error;
mod fetch;
mod pipeline;

pub use error::{Error, Result};
pub use fetch::{
    ACCEPTED_CONTENT_TYPES, FetchError, FetchedImage, HttpImageFetcher, ImageFetcher,
};
pub use pipeline::{ERROR_LOG_CAP, WarmOptions, WarmResult, Warmer};
