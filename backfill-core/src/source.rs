//! External collaborator contracts consumed by the pipeline.
//!
//! Each trait is a focused role: the market-data source, the trading-date
//! calendar, the local series store, and the report sink. Implementations
//! must be safe for concurrent use; the downloader calls `fetch` from every
//! worker.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::BackfillError;
use crate::reports::ComprehensiveBackfillResult;
use crate::types::TimeSeries;

/// Supplier of raw OHLCV records. May fail transiently; an `Ok` empty
/// series is a valid result, distinguishable from an error.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name used to tag errors and log lines.
    fn name(&self) -> &'static str;

    /// Fetch records for `symbol` over the inclusive date range.
    ///
    /// Must be idempotent and safe to call concurrently for different
    /// symbol/range pairs.
    ///
    /// # Errors
    /// Transient failures (network, provider rate limits) are expected and
    /// retried by the caller.
    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, BackfillError>;

    /// Latest date the remote side knows for `symbol`, or `None` if the
    /// remote has no data (or cannot say).
    ///
    /// # Errors
    /// Returns an error only on transport failure; "no data" is `Ok(None)`.
    async fn latest_available(&self, symbol: &str) -> Result<Option<NaiveDate>, BackfillError>;
}

/// Supplier of the expected trading-date calendar.
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    /// Expected trading dates within the inclusive range.
    ///
    /// # Errors
    /// Failure is non-fatal for the continuity checker; it records an issue
    /// and leaves the score neutral.
    async fn expected_trading_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, BackfillError>;
}

/// Coverage summary of locally-held data for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCoverage {
    /// Earliest locally-held date.
    pub first_date: NaiveDate,
    /// Latest locally-held date.
    pub last_date: NaiveDate,
    /// Locally-held record count.
    pub record_count: usize,
    /// Content hash of the local series.
    pub checksum: u64,
    /// When the local series was last written, if tracked.
    pub last_update: Option<DateTime<Utc>>,
}

/// Local persistence layer for per-symbol series.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Coverage summary for `symbol`, or `None` if nothing is held locally.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    async fn coverage(&self, symbol: &str) -> Result<Option<LocalCoverage>, BackfillError>;

    /// Load the full locally-held series for `symbol`, if any.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    async fn load(&self, symbol: &str) -> Result<Option<TimeSeries>, BackfillError>;

    /// Write (replacing) the series for its symbol.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    async fn save(&self, series: &TimeSeries) -> Result<(), BackfillError>;
}

/// Destination for the end-of-run report artifact.
pub trait ReportSink: Send + Sync {
    /// Serialize and write the report, returning the path it landed at.
    ///
    /// # Errors
    /// Returns `BackfillError::Persistence` on write failure.
    fn write_report(
        &self,
        result: &ComprehensiveBackfillResult,
    ) -> Result<PathBuf, BackfillError>;
}
