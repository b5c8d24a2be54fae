//! Pipeline orchestration.
//!
//! `BackfillManager` wires the incremental detector, the downloader, the
//! continuity checker, and the outlier detector into one staged run:
//! `Init -> IncrementalCheck -> Download -> ContinuityCheck -> OutlierDetect
//! -> Persist -> Report -> Done`. Optional stages are skipped via config
//! flags; the order is fixed. A stage error finalizes the aggregate with
//! `success = false` while preserving everything computed so far.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{info, warn};

use backfill_core::{
    BackfillConfig, BackfillError, BackfillStats, ComprehensiveBackfillResult, ConflictResolution,
    DataQualityReport, DataSource, IncrementalUpdateInfo, LocalStore, OutlierSummary, ReportSink,
    TimeSeries, TradingCalendar,
};

use crate::continuity::ContinuityChecker;
use crate::downloader::ParallelDownloader;
use crate::incremental::IncrementalUpdateDetector;
use crate::outlier::OutlierDetector;
use crate::ratelimit::RateLimiter;

/// Orchestrates the backfill pipeline over pluggable collaborators.
pub struct BackfillManager {
    source: Arc<dyn DataSource>,
    calendar: Option<Arc<dyn TradingCalendar>>,
    store: Option<Arc<dyn LocalStore>>,
    sink: Option<Arc<dyn ReportSink>>,
    limiter: Option<Arc<RateLimiter>>,
    resolution: ConflictResolution,
    config: BackfillConfig,
}

/// Builder for a [`BackfillManager`]; validates the configuration exactly
/// once, at `build()`.
pub struct BackfillManagerBuilder {
    source: Option<Arc<dyn DataSource>>,
    calendar: Option<Arc<dyn TradingCalendar>>,
    store: Option<Arc<dyn LocalStore>>,
    sink: Option<Arc<dyn ReportSink>>,
    limiter: Option<Arc<RateLimiter>>,
    resolution: ConflictResolution,
    config: BackfillConfig,
}

impl Default for BackfillManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BackfillManagerBuilder {
    /// Start a builder with the default configuration and no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            calendar: None,
            store: None,
            sink: None,
            limiter: None,
            resolution: ConflictResolution::default(),
            config: BackfillConfig::default(),
        }
    }

    /// Set the market-data source (required).
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the trading calendar; required when continuity checking is on.
    #[must_use]
    pub fn with_calendar(mut self, calendar: Arc<dyn TradingCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Set the local store; required for the incremental and persist stages.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the report sink used by the persist stage.
    #[must_use]
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share a rate limiter across all download workers. Without one the
    /// downloader runs unthrottled.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Conflict-resolution policy recorded in incremental verdicts.
    #[must_use]
    pub const fn conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Replace the pipeline configuration.
    #[must_use]
    pub fn config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and collaborator wiring, and build the
    /// manager.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` if the config is invalid, the source
    /// is missing, or an enabled stage lacks its collaborator.
    pub fn build(self) -> Result<BackfillManager, BackfillError> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| BackfillError::config("a data source is required"))?;
        if self.config.incremental && self.store.is_none() {
            return Err(BackfillError::config(
                "incremental checking requires a local store",
            ));
        }
        if self.config.check_continuity && self.calendar.is_none() {
            return Err(BackfillError::config(
                "continuity checking requires a trading calendar",
            ));
        }
        if self.config.persist && self.store.is_none() && self.sink.is_none() {
            return Err(BackfillError::config(
                "persistence requires a local store or a report sink",
            ));
        }
        Ok(BackfillManager {
            source,
            calendar: self.calendar,
            store: self.store,
            sink: self.sink,
            limiter: self.limiter,
            resolution: self.resolution,
            config: self.config,
        })
    }
}

impl BackfillManager {
    /// Begin building a manager.
    #[must_use]
    pub fn builder() -> BackfillManagerBuilder {
        BackfillManagerBuilder::new()
    }

    /// Run the full pipeline for `symbols` over `[start, end]`.
    ///
    /// Never returns an error: the aggregate always reports `success`,
    /// `execution_time_ms`, and, on failure, a human-readable `error`, with
    /// partial results preserved.
    pub async fn run(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> ComprehensiveBackfillResult {
        let started = Instant::now();
        let mut result = ComprehensiveBackfillResult::new(symbols.to_vec(), start, end);

        match self.run_stages(symbols, start, end, &mut result).await {
            Ok(()) => {
                result.success = true;
            }
            Err(e) => {
                warn!(error = %e, "pipeline failed");
                result.success = false;
                result.error = Some(e.to_string());
            }
        }
        result.execution_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Persisting the report happens after finalization so the artifact
        // carries the definitive success flag and timing.
        if self.config.persist {
            if let Err(e) = self.persist_report(&result) {
                warn!(error = %e, "failed to write report artifact");
                result.success = false;
                result.error.get_or_insert_with(|| e.to_string());
            }
        }
        result
    }

    async fn run_stages(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        result: &mut ComprehensiveBackfillResult,
    ) -> Result<(), BackfillError> {
        let mut to_download: Vec<String> = symbols.to_vec();

        if self.config.incremental {
            info!(symbols = symbols.len(), "stage: incremental check");
            let infos = self.detect_incremental(symbols, start, end).await?;
            to_download = infos
                .iter()
                .filter(|(_, i)| i.needs_update)
                .map(|(s, _)| s.clone())
                .collect();
            result.incremental = infos;

            if to_download.is_empty() {
                // Normal terminal state: everything is already covered.
                info!("all symbols up to date; nothing to download");
                self.finalize_stats(result);
                return Ok(());
            }
        }

        info!(symbols = to_download.len(), "stage: download");
        let downloader = ParallelDownloader::new(
            Arc::clone(&self.source),
            self.limiter.clone(),
            self.config.clone(),
        )?;
        result.series = downloader.download(&to_download, start, end).await?;
        result.progress = downloader.progress();

        if self.config.check_continuity {
            info!(symbols = result.series.len(), "stage: continuity check");
            result.quality = self.check_continuity(&result.series, start, end).await?;
        }

        if self.config.detect_outliers {
            info!(symbols = result.series.len(), "stage: outlier detection");
            result.outliers = self.detect_outliers(&mut result.series)?;
        }

        if self.config.persist {
            if let Some(store) = &self.store {
                info!(symbols = result.series.len(), "stage: persist series");
                for series in result.series.values() {
                    store.save(series).await?;
                }
            }
        }

        self.finalize_stats(result);
        Ok(())
    }

    /// Stage entry point: incremental detection only.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` when no local store is wired, or a
    /// store/source transport error.
    pub async fn detect_incremental(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, IncrementalUpdateInfo>, BackfillError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| BackfillError::config("incremental checking requires a local store"))?;
        let detector = IncrementalUpdateDetector::new(
            Arc::clone(&self.source),
            Arc::clone(store),
            self.resolution,
        );
        detector.detect(symbols, start, end).await
    }

    /// Stage entry point: download only.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` for invalid arguments; partial data
    /// failures are not errors.
    pub async fn download(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, TimeSeries>, BackfillError> {
        let downloader = ParallelDownloader::new(
            Arc::clone(&self.source),
            self.limiter.clone(),
            self.config.clone(),
        )?;
        downloader.download(symbols, start, end).await
    }

    /// Stage entry point: continuity checking only.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` when no calendar is wired.
    pub async fn check_continuity(
        &self,
        series: &BTreeMap<String, TimeSeries>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, DataQualityReport>, BackfillError> {
        let calendar = self
            .calendar
            .as_ref()
            .ok_or_else(|| BackfillError::config("continuity checking requires a trading calendar"))?;
        let checker = ContinuityChecker::new(Arc::clone(calendar));
        Ok(checker.check(series, start, end).await)
    }

    /// Stage entry point: outlier detection (and configured treatment) only.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` when thresholds or methods are
    /// invalid.
    pub fn detect_outliers(
        &self,
        series: &mut BTreeMap<String, TimeSeries>,
    ) -> Result<BTreeMap<String, OutlierSummary>, BackfillError> {
        let detector = OutlierDetector::new(&self.config)?;
        Ok(detector.detect(series))
    }

    fn persist_report(&self, result: &ComprehensiveBackfillResult) -> Result<(), BackfillError> {
        if let Some(sink) = &self.sink {
            let path = sink.write_report(result)?;
            info!(path = %path.display(), "report artifact written");
        }
        Ok(())
    }

    /// Aggregate end-of-run statistics from whatever stages produced output.
    #[allow(clippy::cast_precision_loss)]
    fn finalize_stats(&self, result: &mut ComprehensiveBackfillResult) {
        let mut stats = BackfillStats {
            total_records: result.series.values().map(TimeSeries::len).sum(),
            ..BackfillStats::default()
        };

        for report in result.quality.values() {
            *stats.tier_counts.entry(report.tier).or_insert(0) += 1;
            stats.avg_continuity_score += report.continuity_score;
            if !report.missing_dates.is_empty() {
                stats.symbols_with_missing_dates += 1;
                stats.total_missing_dates += report.missing_dates.len();
            }
        }
        if !result.quality.is_empty() {
            stats.avg_continuity_score /= result.quality.len() as f64;
        }

        for summary in result.outliers.values() {
            if summary.outlier_count > 0 {
                stats.symbols_with_outliers += 1;
            }
            stats.total_outliers += summary.outlier_count;
            stats.avg_outlier_percentage += summary.outlier_percentage;
        }
        if !result.outliers.is_empty() {
            stats.avg_outlier_percentage /= result.outliers.len() as f64;
        }

        result.stats = Some(stats);
    }
}
