//! Bounded-concurrency chunk downloader.
//!
//! Builds the task list as the cartesian product of symbols and date chunks,
//! dispatches it through a bounded worker pool, retries each task with
//! exponential backoff, and merges per-symbol results at a single consumer
//! point. A failed chunk never aborts the run; it is logged, counted, and
//! its dates are simply absent from that symbol's merged series.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use futures::StreamExt;
use tracing::{debug, warn};

use backfill_core::{
    BackfillConfig, BackfillError, Candle, DataSource, ProgressSnapshot, ProgressTracker,
    TimeSeries, merge_into, segment,
};

use crate::ratelimit::{RateLimiter, retry_with_backoff};

/// Downloads historical series for many symbols over a bounded worker pool.
///
/// One instance owns the progress state of one run; construct a fresh
/// downloader per run when progress isolation matters.
pub struct ParallelDownloader {
    source: Arc<dyn DataSource>,
    limiter: Option<Arc<RateLimiter>>,
    config: BackfillConfig,
    tracker: Mutex<Option<ProgressTracker>>,
}

impl ParallelDownloader {
    /// Create a downloader over `source`, optionally throttled by `limiter`.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` if the configuration is invalid; this
    /// is the only construction-time failure.
    pub fn new(
        source: Arc<dyn DataSource>,
        limiter: Option<Arc<RateLimiter>>,
        config: BackfillConfig,
    ) -> Result<Self, BackfillError> {
        config.validate()?;
        Ok(Self {
            source,
            limiter,
            config,
            tracker: Mutex::new(None),
        })
    }

    /// Snapshot of the current (or most recent) run's progress. `None` until
    /// a tracked download starts, or when progress tracking is disabled.
    ///
    /// Safe to call from any thread while `download` is in flight.
    ///
    /// # Panics
    /// Panics if the tracker mutex is poisoned.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.tracker
            .lock()
            .expect("tracker mutex poisoned")
            .as_ref()
            .map(ProgressTracker::snapshot)
    }

    /// Download and merge history for every symbol over `[start, end]`.
    ///
    /// The returned map contains an entry only for symbols with at least one
    /// successfully merged chunk. Partial data failures never fail the
    /// operation; only invalid arguments do.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` for an inverted date range.
    pub async fn download(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, TimeSeries>, BackfillError> {
        let mut seen = std::collections::HashSet::new();
        for s in symbols {
            if !seen.insert(s.as_str()) {
                return Err(BackfillError::config(format!(
                    "duplicate symbol '{s}' in download request"
                )));
            }
        }

        let chunks = segment(start, end, self.config.chunk_size_days)?;

        let tasks: Vec<(String, (NaiveDate, NaiveDate))> = symbols
            .iter()
            .flat_map(|s| chunks.iter().map(move |c| (s.clone(), *c)))
            .collect();

        let tracker = if self.config.track_progress {
            let t = ProgressTracker::new(symbols.len(), tasks.len());
            *self.tracker.lock().expect("tracker mutex poisoned") = Some(t.clone());
            Some(t)
        } else {
            None
        };

        // At most one in-flight fetch per (symbol, chunk) pair: each task
        // appears exactly once in the stream.
        let results = futures::stream::iter(tasks.into_iter().map(|(symbol, chunk)| {
            let source = Arc::clone(&self.source);
            let limiter = self.limiter.clone();
            let tracker = tracker.clone();
            let attempts = self.config.retry_attempts;
            let backoff = self.config.backoff;
            async move {
                if let Some(t) = &tracker {
                    t.task_started(&symbol, chunk);
                }
                debug!(symbol = %symbol, start = %chunk.0, end = %chunk.1, "fetching chunk");
                let fetched = retry_with_backoff(
                    limiter.as_deref(),
                    attempts,
                    &backoff,
                    &symbol,
                    || source.fetch(&symbol, chunk.0, chunk.1),
                )
                .await;
                (symbol, chunk, fetched)
            }
        }))
        .buffer_unordered(self.config.max_workers);

        // Single consumer merge point: per-symbol partial series are only
        // ever touched here, so no extra locking is needed.
        let mut accumulated: HashMap<String, Vec<Candle>> = HashMap::new();
        let mut remaining: HashMap<String, usize> =
            symbols.iter().map(|s| (s.clone(), chunks.len())).collect();

        futures::pin_mut!(results);
        while let Some((symbol, chunk, fetched)) = results.next().await {
            match fetched {
                Ok(series) => {
                    let acc = accumulated.remove(&symbol).unwrap_or_default();
                    accumulated.insert(symbol.clone(), merge_into(acc, series.candles));
                    if let Some(t) = &tracker {
                        t.chunk_completed();
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, start = %chunk.0, end = %chunk.1, error = %e, "chunk failed after retries");
                    if let Some(t) = &tracker {
                        t.chunk_failed();
                    }
                }
            }
            if let Some(left) = remaining.get_mut(&symbol) {
                *left -= 1;
                if *left == 0 {
                    if let Some(t) = &tracker {
                        t.symbol_completed();
                    }
                }
            }
        }

        // Symbols whose every chunk failed never made it into the
        // accumulator, so they are absent from the result by construction.
        Ok(accumulated
            .into_iter()
            .map(|(symbol, candles)| {
                let series = TimeSeries::new(symbol.clone(), candles);
                (symbol, series)
            })
            .collect())
    }
}
