//! Deterministic mock collaborators for tests and examples.
//!
//! [`MockSource`] generates reproducible weekday candles per symbol and can
//! be scripted to fail: permanently for a symbol, or only for the first N
//! attempts of a given chunk (to exercise retry paths). [`WeekdayCalendar`]
//! treats every Monday-Friday as a trading date. [`MemoryStore`] is an
//! in-process `LocalStore`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backfill_core::{
    BackfillError, Candle, DataSource, LocalCoverage, LocalStore, TimeSeries, TradingCalendar,
    series_checksum,
};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};

fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

fn midnight_utc(d: NaiveDate) -> DateTime<Utc> {
    d.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc()
}

/// Deterministic mock data source.
pub struct MockSource {
    latency: Option<Duration>,
    fail_symbols: HashSet<String>,
    fail_first: Mutex<HashMap<(String, NaiveDate), u32>>,
    spikes: HashMap<(String, NaiveDate), f64>,
    latest: HashMap<String, NaiveDate>,
    fetch_calls: AtomicUsize,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Create a source with no scripted failures and no latency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latency: None,
            fail_symbols: HashSet::new(),
            fail_first: Mutex::new(HashMap::new()),
            spikes: HashMap::new(),
            latest: HashMap::new(),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `fetch` call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every fetch for `symbol` fails.
    #[must_use]
    pub fn fail_always(mut self, symbol: &str) -> Self {
        self.fail_symbols.insert(symbol.to_string());
        self
    }

    /// The first `attempts` fetches for the chunk starting at `chunk_start`
    /// of `symbol` fail; later attempts succeed.
    #[must_use]
    pub fn fail_first_attempts(self, symbol: &str, chunk_start: NaiveDate, attempts: u32) -> Self {
        self.fail_first
            .lock()
            .expect("mock mutex poisoned")
            .insert((symbol.to_string(), chunk_start), attempts);
        self
    }

    /// Multiply all prices of `symbol` on `date` by `factor`.
    #[must_use]
    pub fn with_spike(mut self, symbol: &str, date: NaiveDate, factor: f64) -> Self {
        self.spikes.insert((symbol.to_string(), date), factor);
        self
    }

    /// Override the latest remote date reported for `symbol`.
    #[must_use]
    pub fn with_latest(mut self, symbol: &str, date: NaiveDate) -> Self {
        self.latest.insert(symbol.to_string(), date);
        self
    }

    /// Total number of `fetch` calls observed.
    #[must_use]
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn base_price(symbol: &str) -> f64 {
        let seed: u32 = symbol.bytes().map(u32::from).sum();
        40.0 + f64::from(seed % 400)
    }

    /// Deterministic weekday candles for `symbol` over the inclusive range.
    #[must_use]
    pub fn candles_for(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Candle> {
        let base = Self::base_price(symbol);
        let mut out = Vec::new();
        let mut day = start;
        let mut i = 0u32;
        while day <= end {
            if is_weekday(day) {
                let drift = f64::from(i % 20) * 0.25;
                let close = base + drift;
                let factor = self
                    .spikes
                    .get(&(symbol.to_string(), day))
                    .copied()
                    .unwrap_or(1.0);
                out.push(Candle {
                    ts: midnight_utc(day),
                    open: (close - 0.5) * factor,
                    high: (close + 1.0) * factor,
                    low: (close - 1.0) * factor,
                    close: close * factor,
                    volume: Some(1_000_000 + u64::from(i) * 1_000),
                });
                i += 1;
            }
            day = day + Days::new(1);
        }
        out
    }
}

#[async_trait]
impl DataSource for MockSource {
    fn name(&self) -> &'static str {
        "backfill-mock"
    }

    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries, BackfillError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_symbols.contains(symbol) {
            return Err(BackfillError::source(
                self.name(),
                format!("forced failure for {symbol}"),
            ));
        }
        {
            let mut scripted = self.fail_first.lock().expect("mock mutex poisoned");
            if let Some(remaining) = scripted.get_mut(&(symbol.to_string(), start)) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BackfillError::source(
                        self.name(),
                        format!("scripted failure for {symbol} chunk {start}"),
                    ));
                }
            }
        }

        Ok(TimeSeries::new(symbol, self.candles_for(symbol, start, end)))
    }

    async fn latest_available(&self, symbol: &str) -> Result<Option<NaiveDate>, BackfillError> {
        Ok(self.latest.get(symbol).copied())
    }
}

/// Calendar that expects every weekday to be a trading date.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeekdayCalendar;

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn expected_trading_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, BackfillError> {
        let mut dates = BTreeSet::new();
        let mut day = start;
        while day <= end {
            if is_weekday(day) {
                dates.insert(day);
            }
            day = day + Days::new(1);
        }
        Ok(dates)
    }
}

/// Calendar whose lookups always fail; exercises the non-fatal
/// missing-calendar path of the continuity checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCalendar;

#[async_trait]
impl TradingCalendar for UnavailableCalendar {
    async fn expected_trading_dates(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, BackfillError> {
        Err(BackfillError::source("mock-calendar", "calendar unavailable"))
    }
}

/// In-memory `LocalStore` backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<String, (TimeSeries, DateTime<Utc>)>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store with a series (e.g. partial local coverage).
    #[must_use]
    pub fn with_series(self, series: TimeSeries) -> Self {
        self.series
            .lock()
            .expect("mock mutex poisoned")
            .insert(series.symbol.clone(), (series, Utc::now()));
        self
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn coverage(&self, symbol: &str) -> Result<Option<LocalCoverage>, BackfillError> {
        let guard = self.series.lock().expect("mock mutex poisoned");
        Ok(guard.get(symbol).and_then(|(s, saved_at)| {
            let first = s.first_date()?;
            let last = s.last_date()?;
            Some(LocalCoverage {
                first_date: first,
                last_date: last,
                record_count: s.len(),
                checksum: series_checksum(&s.candles),
                last_update: Some(*saved_at),
            })
        }))
    }

    async fn load(&self, symbol: &str) -> Result<Option<TimeSeries>, BackfillError> {
        let guard = self.series.lock().expect("mock mutex poisoned");
        Ok(guard.get(symbol).map(|(s, _)| s.clone()))
    }

    async fn save(&self, series: &TimeSeries) -> Result<(), BackfillError> {
        let mut guard = self.series.lock().expect("mock mutex poisoned");
        guard.insert(series.symbol.clone(), (series.clone(), Utc::now()));
        Ok(())
    }
}
