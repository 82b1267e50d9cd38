//! Persisted enrichment reports
//!
//! The reporter turns a [`RunResult`] into a stable JSON artifact:
//! a timestamped summary plus one detail row per item outcome. Reports
//! are written with the same atomic temp-rename discipline as the image
//! cache, under `<exports>/enrichment-YYYYMMDD-HHMMSS.json` by default.
//! The reporter is stateless between runs.

mod error;
mod report;

pub use error::{Error, Result};
pub use report::{
    EnrichmentDetail, EnrichmentReport, EnrichmentSummary, default_report_path, write_report,
};
