use std::sync::Arc;

use backfill::ParallelDownloader;
use backfill_core::{BackfillConfig, BackoffConfig};
use backfill_mock::MockSource;
use chrono::{Days, NaiveDate};
use proptest::prelude::*;

fn base() -> NaiveDate {
    "2023-01-02".parse().unwrap()
}

fn config(chunk_size_days: i64) -> BackfillConfig {
    BackfillConfig {
        max_workers: 4,
        chunk_size_days,
        retry_attempts: 2,
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_percent: 0,
        },
        ..BackfillConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    // Whatever the range and chunking, the merged series is strictly
    // ordered and never strays outside the requested window.
    #[test]
    fn merged_series_is_sorted_and_bounded(
        offset in 0u64..120,
        len in 0u64..200,
        chunk in 1i64..60,
    ) {
        tokio_test::block_on(async move {
            let start = base() + Days::new(offset);
            let end = start + Days::new(len);
            let downloader = ParallelDownloader::new(
                Arc::new(MockSource::new()),
                None,
                config(chunk),
            )
            .unwrap();

            let map = downloader
                .download(&["AAPL".to_string()], start, end)
                .await
                .unwrap();

            let series = map.get("AAPL").expect("all chunks succeed");
            assert!(series.is_strictly_increasing());
            assert!(series.candles.iter().all(|c| c.date() >= start && c.date() <= end));
        });
    }

    // A chunk that fails fewer times than the retry budget never loses data.
    #[test]
    fn scripted_transients_are_absorbed_by_retries(
        failures in 0u32..2,
        chunk in 5i64..40,
    ) {
        tokio_test::block_on(async move {
            let start = base();
            let end = start + Days::new(60);
            let source = Arc::new(
                MockSource::new().fail_first_attempts("AAPL", start, failures),
            );
            let downloader =
                ParallelDownloader::new(Arc::clone(&source) as _, None, config(chunk)).unwrap();

            let map = downloader
                .download(&["AAPL".to_string()], start, end)
                .await
                .unwrap();

            let series = &map["AAPL"];
            assert_eq!(series.first_date(), Some(start));
            assert_eq!(downloader.progress().unwrap().failed_chunks, 0);
        });
    }
}
