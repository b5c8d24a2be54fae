//! backfill-core
//!
//! Core types, collaborator traits, and time-series utilities shared across
//! the backfill workspace.
//!
//! - `types`: candles, series, configuration, and the closed enums for
//!   detection methods, treatments, quality tiers, and conflict policies.
//! - `source`: external collaborator contracts (`DataSource`,
//!   `TradingCalendar`, `LocalStore`, `ReportSink`).
//! - `segment`: pure adaptive date-range segmentation.
//! - `timeseries`: chunk merging (first-wins), conflict-resolution merging,
//!   and series checksums.
//! - `progress`: the single lock-guarded progress structure shared by
//!   download workers.
//! - `reports`: report and result envelopes, all JSON-serializable.
//!
//! Async runtime (Tokio)
//! ---------------------
//! The collaborator traits are `async_trait` traits and the orchestration
//! crate drives them from a Tokio 1.x runtime; this crate itself spawns
//! nothing.

#![warn(missing_docs)]

mod error;
/// Shared download progress tracking.
pub mod progress;
/// Report and result envelopes.
pub mod reports;
/// Adaptive date-range segmentation.
pub mod segment;
/// External collaborator contracts.
pub mod source;
/// Time-series merge and checksum utilities.
pub mod timeseries;
/// Common data structures and configuration.
pub mod types;

pub use error::BackfillError;
pub use progress::{DownloadProgress, ProgressSnapshot, ProgressTracker};
pub use reports::{
    BackfillStats, ComprehensiveBackfillResult, DataQualityReport, IncrementalUpdateInfo,
    OutlierDetectionResult, OutlierSummary,
};
pub use segment::segment;
pub use source::{DataSource, LocalCoverage, LocalStore, ReportSink, TradingCalendar};
pub use timeseries::merge::{merge_chunks, merge_into, merge_with_resolution};
pub use timeseries::util::series_checksum;
pub use types::{
    BackfillConfig, BackoffConfig, Candle, ConflictResolution, NumericField, OutlierMethod,
    OutlierTreatment, QualityTier, TimeSeries,
};
