//! Common data structures: candles, series, and pipeline configuration.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::BackfillError;

/// A single OHLCV record keyed by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Timestamp of the record (UTC). Unique and strictly increasing within a
    /// validated series.
    pub ts: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// Highest traded price.
    pub high: f64,
    /// Lowest traded price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume, when the source reports it.
    pub volume: Option<u64>,
}

impl Candle {
    /// Calendar date of the record.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.ts.date_naive()
    }
}

/// Numeric columns a detector can run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    /// Opening price.
    Open,
    /// Highest traded price.
    High,
    /// Lowest traded price.
    Low,
    /// Closing price.
    Close,
    /// Traded volume.
    Volume,
}

impl NumericField {
    /// The four price columns plus volume, in canonical order.
    pub const ALL: [Self; 5] = [Self::Open, Self::High, Self::Low, Self::Close, Self::Volume];

    /// Stable column name used in report breakdowns.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Volume => "volume",
        }
    }

    /// Extract this column's value from a candle. `None` for absent volume.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(self, c: &Candle) -> Option<f64> {
        match self {
            Self::Open => Some(c.open),
            Self::High => Some(c.high),
            Self::Low => Some(c.low),
            Self::Close => Some(c.close),
            Self::Volume => c.volume.map(|v| v as f64),
        }
    }

    /// Write this column's value back into a candle. Volume is rounded to the
    /// nearest whole unit and floored at zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set(self, c: &mut Candle, v: f64) {
        match self {
            Self::Open => c.open = v,
            Self::High => c.high = v,
            Self::Low => c.low = v,
            Self::Close => c.close = v,
            Self::Volume => c.volume = Some(v.max(0.0).round() as u64),
        }
    }
}

/// Ordered sequence of OHLCV records for one symbol.
///
/// Ownership model: each pipeline stage returns a new or mutated series and
/// never holds a long-lived reference to a shared mutable instance across
/// threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Symbol the series belongs to.
    pub symbol: String,
    /// Records, sorted by timestamp once validated.
    pub candles: Vec<Candle>,
}

impl TimeSeries {
    /// Create a series for a symbol from raw candles.
    #[must_use]
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            candles,
        }
    }

    /// Create an empty series for a symbol.
    #[must_use]
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Vec::new())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// True if the series holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Date of the first record, if any. Assumes sorted order.
    #[must_use]
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.candles.first().map(Candle::date)
    }

    /// Date of the last record, if any. Assumes sorted order.
    #[must_use]
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.candles.last().map(Candle::date)
    }

    /// True if timestamps are strictly increasing (sorted and duplicate-free).
    #[must_use]
    pub fn is_strictly_increasing(&self) -> bool {
        self.candles.windows(2).all(|w| w[0].ts < w[1].ts)
    }

    /// Sort records by timestamp in place.
    pub fn sort_by_ts(&mut self) {
        self.candles.sort_by_key(|c| c.ts);
    }
}

/// Statistical detection methods for outlier flagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Flag values more than `z_threshold` standard deviations from the mean.
    ZScore,
    /// Flag values outside `[Q1 - k*IQR, Q3 + k*IQR]`.
    Iqr,
    /// MAD-based modified Z-score; robust to the outliers themselves.
    ModifiedZScore,
    /// Isolation-forest-like density method; degrades gracefully when the
    /// sample is too small.
    IsolationForest,
}

impl OutlierMethod {
    /// Stable method name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ZScore => "zscore",
            Self::Iqr => "iqr",
            Self::ModifiedZScore => "modified_zscore",
            Self::IsolationForest => "isolation_forest",
        }
    }
}

/// What to do with rows flagged as outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierTreatment {
    /// Report outliers without modifying the series.
    #[default]
    MarkOnly,
    /// Clamp flagged values into `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` per column.
    Clip,
    /// Drop flagged rows entirely.
    Remove,
    /// Null out flagged values per column, then linearly interpolate along
    /// the time axis.
    Interpolate,
}

/// Coarse data-quality classification derived from continuity score and
/// issue count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Score >= 0.95 and zero issues.
    Excellent,
    /// Score >= 0.90 and at most two issues.
    Good,
    /// Score >= 0.80 and at most five issues.
    Fair,
    /// Anything worse.
    Poor,
}

/// Policy for merging overlapping local and remote data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Replace overlapping rows with the remote copy.
    #[default]
    RemoteWins,
    /// Keep the local copy for overlapping rows.
    LocalWins,
    /// Concatenate and drop duplicate timestamps keeping the last (remote)
    /// occurrence.
    Merge,
}

/// Exponential backoff configuration for fetch retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay in milliseconds for the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_percent: 20,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`,
    /// clamped to `max_delay_ms`. Jitter is applied by the caller.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Immutable pipeline configuration, validated once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Size of the bounded download worker pool.
    pub max_workers: usize,
    /// Upper bound on the adaptive chunk size, in days.
    pub chunk_size_days: i64,
    /// Fetch attempts per chunk before it is marked failed.
    pub retry_attempts: u32,
    /// Backoff schedule between attempts.
    pub backoff: BackoffConfig,
    /// Z-score threshold shared by the plain and modified Z-score methods.
    pub z_threshold: f64,
    /// IQR multiplier `k` for the IQR method.
    pub iqr_multiplier: f64,
    /// Detection methods to run; findings are unioned.
    pub outlier_methods: Vec<OutlierMethod>,
    /// Remediation applied to flagged rows.
    pub treatment: OutlierTreatment,
    /// Whether the downloader maintains shared progress counters.
    pub track_progress: bool,
    /// Run the incremental-diff stage before downloading.
    pub incremental: bool,
    /// Run the continuity-check stage after downloading.
    pub check_continuity: bool,
    /// Run the outlier-detection stage after continuity checking.
    pub detect_outliers: bool,
    /// Persist merged series and the report artifact at the end of the run.
    pub persist: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            chunk_size_days: 90,
            retry_attempts: 3,
            backoff: BackoffConfig::default(),
            z_threshold: 3.0,
            iqr_multiplier: 1.5,
            outlier_methods: vec![OutlierMethod::ZScore, OutlierMethod::Iqr],
            treatment: OutlierTreatment::MarkOnly,
            track_progress: true,
            incremental: true,
            check_continuity: true,
            detect_outliers: true,
            persist: false,
        }
    }
}

impl BackfillConfig {
    /// Validate all numeric bounds. Called exactly once, at construction of
    /// the component that owns the config; an invalid config fails fast
    /// before any I/O.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), BackfillError> {
        if self.max_workers == 0 {
            return Err(BackfillError::config("max_workers must be > 0"));
        }
        if self.chunk_size_days <= 0 {
            return Err(BackfillError::config("chunk_size_days must be > 0"));
        }
        if self.retry_attempts == 0 {
            return Err(BackfillError::config("retry_attempts must be > 0"));
        }
        if self.backoff.base_delay_ms == 0 {
            return Err(BackfillError::config("backoff.base_delay_ms must be > 0"));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(BackfillError::config(
                "backoff.max_delay_ms must be >= backoff.base_delay_ms",
            ));
        }
        if self.backoff.jitter_percent > 100 {
            return Err(BackfillError::config(
                "backoff.jitter_percent must be within [0, 100]",
            ));
        }
        if !(self.z_threshold > 0.0) {
            return Err(BackfillError::config("z_threshold must be > 0"));
        }
        if !(self.iqr_multiplier > 0.0) {
            return Err(BackfillError::config("iqr_multiplier must be > 0"));
        }
        if self.detect_outliers && self.outlier_methods.is_empty() {
            return Err(BackfillError::config(
                "outlier detection enabled but no methods configured",
            ));
        }
        Ok(())
    }
}
