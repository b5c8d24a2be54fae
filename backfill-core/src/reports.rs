//! Report and result envelopes produced by the pipeline stages.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::ProgressSnapshot;
use crate::types::{
    ConflictResolution, OutlierMethod, OutlierTreatment, QualityTier, TimeSeries,
};

/// Per-symbol verdict of the incremental-update detector.
///
/// Created once per detection run; immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalUpdateInfo {
    /// True if at least one date range must be (re)downloaded.
    pub needs_update: bool,
    /// Minimal set of inclusive date ranges to fetch.
    pub update_ranges: Vec<(NaiveDate, NaiveDate)>,
    /// When the local series was last written, if known.
    pub last_update: Option<DateTime<Utc>>,
    /// Content hash of the local series, stored for reference.
    pub local_checksum: Option<u64>,
    /// Policy to apply if overlapping local/remote data is later merged.
    pub conflict_resolution: ConflictResolution,
}

impl IncrementalUpdateInfo {
    /// Verdict for a symbol that needs no download.
    #[must_use]
    pub fn up_to_date(
        last_update: Option<DateTime<Utc>>,
        local_checksum: Option<u64>,
        conflict_resolution: ConflictResolution,
    ) -> Self {
        Self {
            needs_update: false,
            update_ranges: Vec::new(),
            last_update,
            local_checksum,
            conflict_resolution,
        }
    }
}

/// Per-symbol result of continuity checking. Read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    /// Symbol the report covers.
    pub symbol: String,
    /// Records in the checked series.
    pub total_records: usize,
    /// Expected trading dates absent from the series.
    pub missing_dates: Vec<NaiveDate>,
    /// `1 - |missing| / |expected|` when expected dates are known, else `1.0`.
    pub continuity_score: f64,
    /// Validation findings; never auto-fixed by the checker.
    pub issues: Vec<String>,
    /// Deterministic remediation suggestions derived from the issues.
    pub recommendations: Vec<String>,
    /// Coarse quality classification.
    pub tier: QualityTier,
}

/// Result of running one detection method over one symbol's series.
///
/// A method that is unavailable or lacks data populates `error` and flags
/// nothing; this is a soft failure, not a detection failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierDetectionResult {
    /// Method that produced this result.
    pub method: OutlierMethod,
    /// Threshold the method ran with (Z threshold or IQR multiplier).
    pub threshold: f64,
    /// Row keys flagged by this method; always a subset of the input series.
    pub flagged: BTreeSet<DateTime<Utc>>,
    /// Per-column breakdown of flagged row keys.
    pub by_column: BTreeMap<String, BTreeSet<DateTime<Utc>>>,
    /// Soft failure description, when the method could not run.
    pub error: Option<String>,
}

/// Per-symbol union of all requested detection methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSummary {
    /// Symbol the summary covers.
    pub symbol: String,
    /// Rows in the input series.
    pub total_rows: usize,
    /// Union of row keys flagged by any method.
    pub outliers: BTreeSet<DateTime<Utc>>,
    /// `|outliers|`.
    pub outlier_count: usize,
    /// `outlier_count / total_rows * 100`; zero for an empty series.
    pub outlier_percentage: f64,
    /// Per-method results, including soft failures.
    pub methods: Vec<OutlierDetectionResult>,
    /// Treatment strategy the detector ran with.
    pub treatment: OutlierTreatment,
    /// True if the treatment actually modified the series.
    pub treatment_applied: bool,
}

/// Statistics aggregated once at the end of a pipeline run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackfillStats {
    /// Records across all downloaded series.
    pub total_records: usize,
    /// Symbols per quality tier.
    pub tier_counts: BTreeMap<QualityTier, usize>,
    /// Symbols with at least one flagged outlier.
    pub symbols_with_outliers: usize,
    /// Flagged rows across all symbols.
    pub total_outliers: usize,
    /// Mean per-symbol outlier percentage.
    pub avg_outlier_percentage: f64,
    /// Mean per-symbol continuity score.
    pub avg_continuity_score: f64,
    /// Symbols with at least one missing trading date.
    pub symbols_with_missing_dates: usize,
    /// Missing trading dates across all symbols.
    pub total_missing_dates: usize,
}

/// Top-level aggregate handed to the caller and optionally persisted.
///
/// Lifecycle: created at pipeline start with empty maps, populated stage by
/// stage, finalized (success/error/duration) at the end. Partial results
/// computed before a failure are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveBackfillResult {
    /// Symbols the run was asked to backfill.
    pub symbols: Vec<String>,
    /// Start of the requested date range (inclusive).
    pub start: NaiveDate,
    /// End of the requested date range (inclusive).
    pub end: NaiveDate,
    /// Per-symbol merged series; only symbols with at least one successfully
    /// merged chunk appear.
    pub series: BTreeMap<String, TimeSeries>,
    /// Per-symbol incremental verdicts, when the stage ran.
    pub incremental: BTreeMap<String, IncrementalUpdateInfo>,
    /// Per-symbol quality reports, when the stage ran.
    pub quality: BTreeMap<String, DataQualityReport>,
    /// Per-symbol outlier summaries, when the stage ran.
    pub outliers: BTreeMap<String, OutlierSummary>,
    /// End-of-run aggregate statistics.
    pub stats: Option<BackfillStats>,
    /// Final progress counters of the download stage.
    pub progress: Option<ProgressSnapshot>,
    /// Wall-clock duration of the run in milliseconds, measured up to the
    /// failure point on error.
    pub execution_time_ms: u64,
    /// True unless a fatal pipeline error occurred.
    pub success: bool,
    /// Human-readable description of the fatal error, if any.
    pub error: Option<String>,
}

impl ComprehensiveBackfillResult {
    /// Create the empty aggregate for a run over `symbols` and `[start, end]`.
    #[must_use]
    pub fn new(symbols: Vec<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbols,
            start,
            end,
            series: BTreeMap::new(),
            incremental: BTreeMap::new(),
            quality: BTreeMap::new(),
            outliers: BTreeMap::new(),
            stats: None,
            progress: None,
            execution_time_ms: 0,
            success: false,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_round_trips_through_json() {
        let mut r = ComprehensiveBackfillResult::new(
            vec!["AAPL".into()],
            "2023-01-01".parse().unwrap(),
            "2023-01-31".parse().unwrap(),
        );
        r.success = true;
        r.stats = Some(BackfillStats {
            total_records: 21,
            tier_counts: BTreeMap::from([(QualityTier::Good, 1)]),
            ..BackfillStats::default()
        });

        let json = serde_json::to_string(&r).unwrap();
        let back: ComprehensiveBackfillResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
