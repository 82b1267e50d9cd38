//! Batched metadata enrichment for tubevault
//!
//! An enrichment run takes the single advisory lock, pulls candidates
//! from storage in priority order, and resolves them against the remote
//! API in batches of its per-call limit. Each batch commits as one
//! storage transaction: after a run, every staged update for a batch is
//! visible or none is. Items absent from a batch response are tombstoned
//! as deleted; a rate-limit signal backs the run off and replays the
//! batch once. Interruption is cooperative and leaves untouched
//! candidates for the next run.

mod coordinator;
mod error;
mod fields;

pub use coordinator::{
    Coordinator, ENRICHMENT_LOCK_NAME, EnrichOptions, EnrichmentOutcome, ItemOutcome, RunResult,
};
pub use error::{Error, Result};
pub use fields::{
    DESCRIPTION_CHAR_LIMIT, TITLE_FIELD, changed_fields, channel_fields, playlist_fields,
    video_fields,
};
