//! Historical market-data backfill and data-quality pipeline.
//!
//! Overview
//! - Decides what actually needs fetching by diffing local coverage against
//!   the requested range and remote availability.
//! - Downloads symbols x date-chunks over a bounded worker pool, retrying
//!   transient failures with exponential backoff and optional shared rate
//!   limiting; a failed chunk never aborts a run.
//! - Validates the merged series against an expected trading-date calendar
//!   and emits a scored quality report per symbol.
//! - Runs interchangeable statistical outlier detectors (Z-score, IQR,
//!   modified Z-score, isolation-like) and optionally treats findings
//!   (clip, remove, interpolate, or mark only).
//! - Aggregates everything into one JSON-serializable result and can
//!   persist series plus a timestamped report artifact.
//!
//! Key behaviors and trade-offs
//! - Partial success is the norm: failed chunks and soft per-method
//!   detector failures are recorded, not escalated. The pipeline itself
//!   fails only on invalid configuration or a fatal orchestration error.
//! - Progress counters live behind a single lock and can be snapshotted
//!   from any thread while a download is in flight.
//! - Chunk merges keep the first occurrence of a timestamp, so retried or
//!   overlapping chunks are idempotent.
//!
//! Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use backfill::{BackfillManager, JsonReportSink};
//! use backfill_core::BackfillConfig;
//!
//! let manager = BackfillManager::builder()
//!     .with_source(Arc::new(my_source))
//!     .with_calendar(Arc::new(my_calendar))
//!     .with_store(Arc::new(my_store))
//!     .with_report_sink(Arc::new(JsonReportSink::new("reports")))
//!     .config(BackfillConfig::default())
//!     .build()?;
//!
//! let result = manager
//!     .run(&symbols, "2023-01-01".parse()?, "2023-12-31".parse()?)
//!     .await;
//! assert!(result.success);
//! ```

#![warn(missing_docs)]

/// Continuity validation and repair.
pub mod continuity;
/// Bounded-concurrency chunk downloader.
pub mod downloader;
/// Incremental-diff detection and conflict resolution.
pub mod incremental;
/// Pipeline orchestration.
pub mod manager;
/// Statistical outlier detection and remediation.
pub mod outlier;
/// Filesystem report sink.
pub mod persist;
/// Shared rate limiting and retry plumbing.
pub mod ratelimit;

pub use continuity::ContinuityChecker;
pub use downloader::ParallelDownloader;
pub use incremental::IncrementalUpdateDetector;
pub use manager::{BackfillManager, BackfillManagerBuilder};
pub use outlier::OutlierDetector;
pub use persist::JsonReportSink;
pub use ratelimit::{RateLimiter, RateLimiterConfig, retry_with_backoff};

// Re-export the core surface so most callers depend on `backfill` alone.
pub use backfill_core::{
    BackfillConfig, BackfillError, BackfillStats, BackoffConfig, Candle,
    ComprehensiveBackfillResult, ConflictResolution, DataQualityReport, DataSource,
    IncrementalUpdateInfo, LocalCoverage, LocalStore, NumericField, OutlierDetectionResult,
    OutlierMethod, OutlierSummary, OutlierTreatment, ProgressSnapshot, QualityTier, ReportSink,
    TimeSeries, TradingCalendar,
};
