use std::sync::Arc;

use backfill::IncrementalUpdateDetector;
use backfill_core::{BackfillError, Candle, ConflictResolution, DataSource, LocalStore, TimeSeries};
use backfill_mock::{MemoryStore, MockSource};
use chrono::{Days, NaiveDate};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

// One candle per calendar day, so coverage bounds equal the requested range.
fn daily_series(symbol: &str, start: NaiveDate, end: NaiveDate) -> TimeSeries {
    let mut candles = Vec::new();
    let mut day = start;
    let mut price = 100.0;
    while day <= end {
        candles.push(Candle {
            ts: day.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            open: price - 0.5,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: Some(1_000),
        });
        price += 0.25;
        day = day + Days::new(1);
    }
    TimeSeries::new(symbol, candles)
}

fn detector(source: MockSource, store: MemoryStore) -> IncrementalUpdateDetector {
    IncrementalUpdateDetector::new(
        Arc::new(source),
        Arc::new(store),
        ConflictResolution::default(),
    )
}

#[tokio::test]
async fn trailing_gap_is_the_only_range_fetched() {
    let store =
        MemoryStore::new().with_series(daily_series("AAPL", d("2023-01-01"), d("2023-01-15")));
    let source = MockSource::new().with_latest("AAPL", d("2023-01-31"));
    let det = detector(source, store);

    let infos = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();

    let info = &infos["AAPL"];
    assert!(info.needs_update);
    assert_eq!(info.update_ranges, vec![(d("2023-01-16"), d("2023-01-31"))]);
    assert!(info.local_checksum.is_some());
}

#[tokio::test]
async fn missing_local_data_requests_the_full_range() {
    let det = detector(
        MockSource::new().with_latest("AAPL", d("2023-01-31")),
        MemoryStore::new(),
    );

    let infos = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();

    let info = &infos["AAPL"];
    assert!(info.needs_update);
    assert_eq!(info.update_ranges, vec![(d("2023-01-01"), d("2023-01-31"))]);
    assert!(info.local_checksum.is_none());
}

#[tokio::test]
async fn remote_silence_with_local_data_means_nothing_to_do() {
    // No with_latest: the source reports no latest date for the symbol.
    let store =
        MemoryStore::new().with_series(daily_series("AAPL", d("2023-01-01"), d("2023-01-15")));
    let det = detector(MockSource::new(), store);

    let infos = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();

    let info = &infos["AAPL"];
    assert!(!info.needs_update);
    assert!(info.update_ranges.is_empty());
}

#[tokio::test]
async fn leading_and_trailing_gaps_are_both_reported() {
    let store =
        MemoryStore::new().with_series(daily_series("AAPL", d("2023-01-10"), d("2023-01-20")));
    let source = MockSource::new().with_latest("AAPL", d("2023-01-31"));
    let det = detector(source, store);

    let infos = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();

    let info = &infos["AAPL"];
    assert!(info.needs_update);
    assert_eq!(
        info.update_ranges,
        vec![
            (d("2023-01-01"), d("2023-01-09")),
            (d("2023-01-21"), d("2023-01-31")),
        ]
    );
}

#[tokio::test]
async fn trailing_gap_is_capped_by_the_requested_end() {
    let store =
        MemoryStore::new().with_series(daily_series("AAPL", d("2023-01-01"), d("2023-01-15")));
    let source = MockSource::new().with_latest("AAPL", d("2023-06-30"));
    let det = detector(source, store);

    let infos = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-20"))
        .await
        .unwrap();

    assert_eq!(
        infos["AAPL"].update_ranges,
        vec![(d("2023-01-16"), d("2023-01-20"))]
    );
}

#[tokio::test]
async fn closing_the_gap_makes_the_detector_idempotent() {
    let store = Arc::new(
        MemoryStore::new().with_series(daily_series("AAPL", d("2023-01-01"), d("2023-01-15"))),
    );
    let source = Arc::new(MockSource::new().with_latest("AAPL", d("2023-01-31")));
    let det = IncrementalUpdateDetector::new(
        Arc::clone(&source) as Arc<dyn DataSource>,
        Arc::clone(&store) as Arc<dyn LocalStore>,
        ConflictResolution::default(),
    );

    let first = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();
    assert!(first["AAPL"].needs_update);

    // Fill the trailing gap the way a caller would: fetch, merge, save.
    let mut merged = daily_series("AAPL", d("2023-01-01"), d("2023-01-15"));
    for (gap_start, gap_end) in &first["AAPL"].update_ranges {
        let chunk = source.fetch("AAPL", *gap_start, *gap_end).await.unwrap();
        merged = det.resolve_conflicts(merged, chunk);
    }
    assert_eq!(merged.last_date(), Some(d("2023-01-31")));
    store.save(&merged).await.unwrap();

    let second = det
        .detect(&["AAPL".into()], d("2023-01-01"), d("2023-01-31"))
        .await
        .unwrap();
    assert!(!second["AAPL"].needs_update);
    assert!(second["AAPL"].update_ranges.is_empty());
}

#[tokio::test]
async fn remote_wins_replaces_overlapping_local_rows() {
    let det = detector(MockSource::new(), MemoryStore::new());

    let local = daily_series("AAPL", d("2023-01-01"), d("2023-01-05"));
    let mut remote = daily_series("AAPL", d("2023-01-03"), d("2023-01-07"));
    for c in &mut remote.candles {
        c.close = 999.0;
    }

    let merged = det.resolve_conflicts(local, remote);
    assert_eq!(merged.first_date(), Some(d("2023-01-01")));
    assert_eq!(merged.last_date(), Some(d("2023-01-07")));
    assert!(merged.is_strictly_increasing());
    let overlap = merged
        .candles
        .iter()
        .find(|c| c.date() == d("2023-01-03"))
        .unwrap();
    assert_eq!(overlap.close, 999.0);
}

#[tokio::test]
async fn inverted_range_is_a_config_error() {
    let det = detector(MockSource::new(), MemoryStore::new());
    let err = det
        .detect(&["AAPL".into()], d("2023-02-01"), d("2023-01-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackfillError::Config(_)));
}
