use std::collections::BTreeMap;
use std::sync::Arc;

use backfill::ContinuityChecker;
use backfill_core::{Candle, QualityTier, TimeSeries};
use backfill_mock::{MockSource, UnavailableCalendar, WeekdayCalendar};
use chrono::NaiveDate;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn weekday_series(symbol: &str, start: NaiveDate, end: NaiveDate) -> TimeSeries {
    TimeSeries::new(symbol, MockSource::new().candles_for(symbol, start, end))
}

fn without_dates(mut series: TimeSeries, drop: &[NaiveDate]) -> TimeSeries {
    series.candles.retain(|c| !drop.contains(&c.date()));
    series
}

fn one(symbol: &str, series: TimeSeries) -> BTreeMap<String, TimeSeries> {
    BTreeMap::from([(symbol.to_string(), series)])
}

async fn check_weekdays(
    series: TimeSeries,
    start: NaiveDate,
    end: NaiveDate,
) -> backfill_core::DataQualityReport {
    let checker = ContinuityChecker::new(Arc::new(WeekdayCalendar));
    let mut reports = checker.check(&one("AAPL", series), start, end).await;
    reports.remove("AAPL").unwrap()
}

#[tokio::test]
async fn complete_series_scores_excellent() {
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let report = check_weekdays(weekday_series("AAPL", start, end), start, end).await;

    assert_eq!(report.continuity_score, 1.0);
    assert!(report.issues.is_empty());
    assert!(report.missing_dates.is_empty());
    assert_eq!(report.tier, QualityTier::Excellent);
}

#[tokio::test]
async fn a_few_missing_dates_still_score_good() {
    // 31 expected weekdays in this range; dropping 3 leaves 28/31.
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let dropped = [d("2023-01-10"), d("2023-01-17"), d("2023-01-24")];
    let series = without_dates(weekday_series("AAPL", start, end), &dropped);
    let report = check_weekdays(series, start, end).await;

    assert_eq!(report.missing_dates, dropped.to_vec());
    assert!((report.continuity_score - 28.0 / 31.0).abs() < 1e-9);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.tier, QualityTier::Good);
    // Few enough misses to suggest each date individually.
    assert_eq!(report.recommendations.len(), 3);
    assert!(
        report
            .recommendations
            .iter()
            .all(|r| r.starts_with("re-download missing date"))
    );
}

#[tokio::test]
async fn a_full_missing_week_is_fair_with_a_gap_issue() {
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let dropped = [
        d("2023-01-09"),
        d("2023-01-10"),
        d("2023-01-11"),
        d("2023-01-12"),
        d("2023-01-13"),
    ];
    let series = without_dates(weekday_series("AAPL", start, end), &dropped);
    let report = check_weekdays(series, start, end).await;

    assert_eq!(report.missing_dates.len(), 5);
    assert!((report.continuity_score - 26.0 / 31.0).abs() < 1e-9);
    assert_eq!(report.tier, QualityTier::Fair);
    assert!(report.issues.iter().any(|i| i.contains("-day gap between")));
}

#[tokio::test]
async fn many_missing_dates_suggest_a_full_redownload() {
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let dropped = [
        d("2023-01-04"),
        d("2023-01-10"),
        d("2023-01-17"),
        d("2023-01-24"),
        d("2023-01-31"),
        d("2023-02-07"),
    ];
    let series = without_dates(weekday_series("AAPL", start, end), &dropped);
    let report = check_weekdays(series, start, end).await;

    assert_eq!(report.missing_dates.len(), 6);
    assert!(
        report
            .recommendations
            .contains(&"re-download the full range".to_string())
    );
}

#[tokio::test]
async fn empty_series_is_poor() {
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let report = check_weekdays(TimeSeries::empty("AAPL"), start, end).await;

    assert_eq!(report.tier, QualityTier::Poor);
    assert_eq!(report.continuity_score, 0.0);
    assert!(report.issues.contains(&"empty data".to_string()));
    assert!(
        report
            .recommendations
            .contains(&"re-download the full range".to_string())
    );
}

#[tokio::test]
async fn disorder_and_duplicates_are_reported() {
    let (start, end) = (d("2023-01-02"), d("2023-01-06"));
    let mut series = weekday_series("AAPL", start, end);
    series.candles.swap(0, 2);
    let dup = series.candles[1].clone();
    series.candles.push(dup);
    let report = check_weekdays(series, start, end).await;

    assert!(
        report
            .issues
            .contains(&"timestamps are not in chronological order".to_string())
    );
    assert!(report.issues.iter().any(|i| i.contains("duplicate timestamps")));
    assert!(report.recommendations.contains(&"sort by timestamp".to_string()));
    assert!(
        report
            .recommendations
            .contains(&"drop duplicate timestamps".to_string())
    );
}

#[tokio::test]
async fn weekend_rows_are_flagged_without_hurting_the_score() {
    let (start, end) = (d("2023-01-02"), d("2023-01-13"));
    let mut series = weekday_series("AAPL", start, end);
    series.candles.push(Candle {
        ts: d("2023-01-07").and_hms_opt(0, 0, 0).unwrap().and_utc(),
        open: 100.0,
        high: 101.0,
        low: 99.0,
        close: 100.5,
        volume: Some(1),
    });
    series.sort_by_ts();
    let report = check_weekdays(series, start, end).await;

    assert_eq!(report.continuity_score, 1.0);
    assert!(report.issues.contains(&"1 weekend-dated rows".to_string()));
    assert!(report.recommendations.contains(&"strip weekend rows".to_string()));
    assert_eq!(report.tier, QualityTier::Good);
}

#[tokio::test]
async fn calendar_failure_is_nonfatal_and_scores_neutral() {
    let (start, end) = (d("2023-01-02"), d("2023-02-13"));
    let checker = ContinuityChecker::new(Arc::new(UnavailableCalendar));
    let reports = checker
        .check(&one("AAPL", weekday_series("AAPL", start, end)), start, end)
        .await;

    let report = &reports["AAPL"];
    assert_eq!(report.continuity_score, 1.0);
    assert!(
        report
            .issues
            .contains(&"trading calendar unavailable".to_string())
    );
    assert!(report.missing_dates.is_empty());
}

#[tokio::test]
async fn repair_sorts_dedups_and_optionally_strips_weekends() {
    let (start, end) = (d("2023-01-02"), d("2023-01-06"));
    let mut series = weekday_series("AAPL", start, end);
    series.candles.swap(0, 3);
    let mut dup = series.candles[1].clone();
    dup.close = -1.0;
    series.candles.push(dup);
    series.candles.push(Candle {
        ts: d("2023-01-07").and_hms_opt(0, 0, 0).unwrap().and_utc(),
        open: 1.0,
        high: 1.0,
        low: 1.0,
        close: 1.0,
        volume: None,
    });

    let repaired = ContinuityChecker::repair(&series, false);
    assert!(repaired.is_strictly_increasing());
    assert_eq!(repaired.len(), 6);
    // First occurrence wins over the mutated duplicate.
    assert!(repaired.candles.iter().all(|c| c.close > 0.0));

    let weekdays_only = ContinuityChecker::repair(&series, true);
    assert_eq!(weekdays_only.len(), 5);
    assert_eq!(weekdays_only.last_date(), Some(d("2023-01-06")));
}
