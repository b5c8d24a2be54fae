use std::sync::Arc;

use backfill::{ParallelDownloader, RateLimiter, RateLimiterConfig};
use backfill_core::{BackfillConfig, BackfillError, BackoffConfig};
use backfill_mock::MockSource;
use chrono::NaiveDate;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn fast_config() -> BackfillConfig {
    BackfillConfig {
        max_workers: 3,
        chunk_size_days: 7,
        retry_attempts: 3,
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_percent: 0,
        },
        ..BackfillConfig::default()
    }
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn one_persistently_failing_chunk_does_not_lose_either_symbol() {
    // 2 symbols x 4 chunks = 8 tasks; one chunk fails every attempt.
    let source = Arc::new(
        MockSource::new().fail_first_attempts("MSFT", d("2023-03-08"), 3),
    );
    let downloader =
        ParallelDownloader::new(source, None, fast_config()).unwrap();

    let map = downloader
        .download(&symbols(&["AAPL", "MSFT"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap();

    assert!(map.contains_key("AAPL"));
    assert!(map.contains_key("MSFT"));

    // The failing chunk's dates are absent from MSFT's merged series.
    let msft = &map["MSFT"];
    assert!(
        msft.candles
            .iter()
            .all(|c| c.date() < d("2023-03-08") || c.date() > d("2023-03-14"))
    );
    assert!(msft.candles.iter().any(|c| c.date() >= d("2023-03-15")));

    let progress = downloader.progress().expect("tracking enabled");
    assert_eq!(progress.failed_chunks, 1);
    assert_eq!(progress.completed_chunks, 7);
    assert_eq!(progress.completed_symbols, 2);
    assert_eq!(progress.total_chunks, 8);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let source = Arc::new(
        MockSource::new().fail_first_attempts("AAPL", d("2023-03-01"), 2),
    );
    let downloader =
        ParallelDownloader::new(Arc::clone(&source) as _, None, fast_config()).unwrap();

    let map = downloader
        .download(&symbols(&["AAPL"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap();

    let aapl = &map["AAPL"];
    assert!(aapl.is_strictly_increasing());
    assert!(aapl.candles.iter().any(|c| c.date() <= d("2023-03-07")));

    // 4 chunk tasks plus 2 scripted failures.
    assert_eq!(source.fetch_call_count(), 6);
    assert_eq!(downloader.progress().unwrap().failed_chunks, 0);
}

#[tokio::test]
async fn symbol_with_every_chunk_failed_is_absent() {
    let source = Arc::new(MockSource::new().fail_always("DOWN"));
    let downloader =
        ParallelDownloader::new(source, None, fast_config()).unwrap();

    let map = downloader
        .download(&symbols(&["DOWN", "AAPL"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap();

    assert!(!map.contains_key("DOWN"));
    assert!(map.contains_key("AAPL"));
    assert_eq!(downloader.progress().unwrap().failed_chunks, 4);
}

#[tokio::test]
async fn merged_series_has_unique_sorted_timestamps() {
    let source = Arc::new(MockSource::new());
    let downloader =
        ParallelDownloader::new(source, None, fast_config()).unwrap();

    let map = downloader
        .download(&symbols(&["AAPL"]), d("2023-01-02"), d("2023-06-30"))
        .await
        .unwrap();

    assert!(map["AAPL"].is_strictly_increasing());
}

#[tokio::test]
async fn duplicate_symbols_are_rejected() {
    let source = Arc::new(MockSource::new());
    let downloader =
        ParallelDownloader::new(source, None, fast_config()).unwrap();

    let err = downloader
        .download(&symbols(&["AAPL", "AAPL"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackfillError::Config(_)));
}

#[tokio::test]
async fn progress_tracking_can_be_disabled() {
    let source = Arc::new(MockSource::new());
    let cfg = BackfillConfig {
        track_progress: false,
        ..fast_config()
    };
    let downloader = ParallelDownloader::new(source, None, cfg).unwrap();

    downloader
        .download(&symbols(&["AAPL"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap();
    assert!(downloader.progress().is_none());
}

#[tokio::test]
async fn download_works_under_a_shared_rate_limiter() {
    let source = Arc::new(MockSource::new());
    let limiter = Arc::new(
        RateLimiter::new(RateLimiterConfig {
            max_calls: 1_000,
            window: std::time::Duration::from_secs(60),
        })
        .unwrap(),
    );
    let downloader =
        ParallelDownloader::new(source, Some(limiter), fast_config()).unwrap();

    let map = downloader
        .download(&symbols(&["AAPL", "MSFT"]), d("2023-03-01"), d("2023-03-28"))
        .await
        .unwrap();
    assert_eq!(map.len(), 2);
}

#[test]
fn invalid_config_fails_at_construction() {
    let source: Arc<MockSource> = Arc::new(MockSource::new());
    let cfg = BackfillConfig {
        max_workers: 0,
        ..BackfillConfig::default()
    };
    assert!(ParallelDownloader::new(source, None, cfg).is_err());
}
