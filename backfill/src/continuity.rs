//! Continuity validation: ordering, duplicates, and completeness of a
//! downloaded series against an expected trading-date calendar.
//!
//! `check` only observes; it records issues and recommendations but never
//! modifies a series. The opt-in [`ContinuityChecker::repair`] helper does
//! the mechanical fixes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use tracing::debug;

use backfill_core::{
    DataQualityReport, QualityTier, TimeSeries, TradingCalendar, merge_chunks,
};

/// Consecutive records further apart than this many calendar days are
/// reported as an abnormal gap.
const MAX_GAP_DAYS: i64 = 5;
/// Missing dates up to this count get individual re-download suggestions.
const PER_DATE_RECOMMENDATION_LIMIT: usize = 5;

/// Validates downloaded series and scores their quality.
pub struct ContinuityChecker {
    calendar: Arc<dyn TradingCalendar>,
}

impl ContinuityChecker {
    /// Create a checker over an expected trading-date calendar.
    #[must_use]
    pub fn new(calendar: Arc<dyn TradingCalendar>) -> Self {
        Self { calendar }
    }

    /// Check every series in the map against `[start, end]`.
    ///
    /// Calendar failures are non-fatal: the affected report records an issue
    /// and keeps a neutral score.
    pub async fn check(
        &self,
        series: &BTreeMap<String, TimeSeries>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BTreeMap<String, DataQualityReport> {
        let expected = match self.calendar.expected_trading_dates(start, end).await {
            Ok(dates) => Some(dates),
            Err(e) => {
                debug!(error = %e, "trading calendar unavailable");
                None
            }
        };

        series
            .iter()
            .map(|(symbol, s)| (symbol.clone(), Self::check_one(s, expected.as_ref())))
            .collect()
    }

    fn check_one(series: &TimeSeries, expected: Option<&BTreeSet<NaiveDate>>) -> DataQualityReport {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let empty = series.is_empty();
        if empty {
            issues.push("empty data".to_string());
        }

        let sorted = series
            .candles
            .windows(2)
            .all(|w| w[0].ts <= w[1].ts);
        if !sorted {
            issues.push("timestamps are not in chronological order".to_string());
            recommendations.push("sort by timestamp".to_string());
        }

        // Duplicates are the downloader's job to drop; here they are only a
        // validation finding.
        let mut seen = BTreeSet::new();
        let duplicates = series
            .candles
            .iter()
            .filter(|c| !seen.insert(c.ts))
            .count();
        if duplicates > 0 {
            issues.push(format!("{duplicates} duplicate timestamps"));
            recommendations.push("drop duplicate timestamps".to_string());
        }

        let actual: BTreeSet<NaiveDate> = series.candles.iter().map(|c| c.date()).collect();
        let (missing_dates, continuity_score) = match expected {
            Some(exp) if !exp.is_empty() => {
                let missing: Vec<NaiveDate> = exp.difference(&actual).copied().collect();
                #[allow(clippy::cast_precision_loss)]
                let score = 1.0 - missing.len() as f64 / exp.len() as f64;
                (missing, score)
            }
            Some(_) => (Vec::new(), 1.0),
            None => {
                issues.push("trading calendar unavailable".to_string());
                (Vec::new(), 1.0)
            }
        };
        if !missing_dates.is_empty() {
            issues.push(format!("{} expected trading dates missing", missing_dates.len()));
            if missing_dates.len() <= PER_DATE_RECOMMENDATION_LIMIT {
                for d in &missing_dates {
                    recommendations.push(format!("re-download missing date {d}"));
                }
            } else {
                recommendations.push("re-download the full range".to_string());
            }
        }

        // Abnormal gaps between consecutive records, measured in calendar days.
        let mut dates: Vec<NaiveDate> = actual.iter().copied().collect();
        dates.sort_unstable();
        for w in dates.windows(2) {
            let gap = (w[1] - w[0]).num_days();
            if gap > MAX_GAP_DAYS {
                issues.push(format!("{gap}-day gap between {} and {}", w[0], w[1]));
            }
        }

        let weekend_rows = series
            .candles
            .iter()
            .filter(|c| matches!(c.date().weekday(), Weekday::Sat | Weekday::Sun))
            .count();
        if weekend_rows > 0 {
            issues.push(format!("{weekend_rows} weekend-dated rows"));
            recommendations.push("strip weekend rows".to_string());
        }

        let tier = if empty {
            QualityTier::Poor
        } else {
            Self::tier(continuity_score, issues.len())
        };
        if empty {
            recommendations.push("re-download the full range".to_string());
        }

        DataQualityReport {
            symbol: series.symbol.clone(),
            total_records: series.len(),
            missing_dates,
            continuity_score,
            issues,
            recommendations,
            tier,
        }
    }

    /// First matching tier wins.
    fn tier(score: f64, issue_count: usize) -> QualityTier {
        if score >= 0.95 && issue_count == 0 {
            QualityTier::Excellent
        } else if score >= 0.90 && issue_count <= 2 {
            QualityTier::Good
        } else if score >= 0.80 && issue_count <= 5 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    /// Mechanical repair: sort by timestamp, drop duplicate timestamps
    /// keeping the first occurrence, and optionally strip weekend-dated
    /// rows. Never invoked by `check`; callers opt in explicitly.
    #[must_use]
    pub fn repair(series: &TimeSeries, strip_weekends: bool) -> TimeSeries {
        let mut candles = merge_chunks([series.candles.clone()]);
        if strip_weekends {
            candles.retain(|c| !matches!(c.date().weekday(), Weekday::Sat | Weekday::Sun));
        }
        TimeSeries::new(series.symbol.clone(), candles)
    }
}
