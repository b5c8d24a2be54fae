//! Shared download progress tracking.
//!
//! One `DownloadProgress` instance exists per downloader run. Every mutation
//! and read goes through a single mutex; counters are monotonically
//! non-decreasing within a run, and derived percentages are computed at
//! snapshot time, never stored.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw progress counters guarded by [`ProgressTracker`]'s lock.
#[derive(Debug)]
pub struct DownloadProgress {
    /// Symbols in the run.
    pub total_symbols: usize,
    /// Symbols whose chunks have all resolved (success or failure).
    pub completed_symbols: usize,
    /// Chunk tasks in the run.
    pub total_chunks: usize,
    /// Chunk tasks that merged successfully.
    pub completed_chunks: usize,
    /// Chunk tasks that exhausted their retries.
    pub failed_chunks: usize,
    /// Symbol of the most recently dispatched task.
    pub current_symbol: Option<String>,
    /// Date range of the most recently dispatched task.
    pub current_chunk: Option<(NaiveDate, NaiveDate)>,
    /// Wall-clock start of the run.
    pub started_at: Instant,
}

impl DownloadProgress {
    fn new(total_symbols: usize, total_chunks: usize) -> Self {
        Self {
            total_symbols,
            completed_symbols: 0,
            total_chunks,
            completed_chunks: 0,
            failed_chunks: 0,
            current_symbol: None,
            current_chunk: None,
            started_at: Instant::now(),
        }
    }
}

/// Point-in-time view of a run's progress, with derived percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Symbols whose chunks have all resolved.
    pub completed_symbols: usize,
    /// Symbols in the run.
    pub total_symbols: usize,
    /// Chunk tasks that merged successfully.
    pub completed_chunks: usize,
    /// Chunk tasks that exhausted their retries.
    pub failed_chunks: usize,
    /// Chunk tasks in the run.
    pub total_chunks: usize,
    /// `completed_symbols / total_symbols`, as a percentage.
    pub symbol_progress_pct: f64,
    /// Resolved chunks (completed + failed) over total, as a percentage.
    pub chunk_progress_pct: f64,
    /// Symbol of the most recently dispatched task.
    pub current_symbol: Option<String>,
    /// Date range of the most recently dispatched task.
    pub current_chunk: Option<(NaiveDate, NaiveDate)>,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
}

/// Thread-safe handle to a run's progress counters.
///
/// Cloning shares the same underlying counters. Safe to query from any
/// thread while a download is in flight.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<DownloadProgress>>,
}

#[allow(clippy::cast_precision_loss)]
fn pct(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

impl ProgressTracker {
    /// Start tracking a run of `total_symbols` symbols and `total_chunks`
    /// chunk tasks.
    #[must_use]
    pub fn new(total_symbols: usize, total_chunks: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DownloadProgress::new(
                total_symbols,
                total_chunks,
            ))),
        }
    }

    /// Record a task dispatch.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn task_started(&self, symbol: &str, chunk: (NaiveDate, NaiveDate)) {
        let mut p = self.inner.lock().expect("progress mutex poisoned");
        p.current_symbol = Some(symbol.to_string());
        p.current_chunk = Some(chunk);
    }

    /// Record a successfully merged chunk.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn chunk_completed(&self) {
        let mut p = self.inner.lock().expect("progress mutex poisoned");
        p.completed_chunks += 1;
    }

    /// Record a chunk that exhausted its retries.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn chunk_failed(&self) {
        let mut p = self.inner.lock().expect("progress mutex poisoned");
        p.failed_chunks += 1;
    }

    /// Record a symbol whose chunks have all resolved.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn symbol_completed(&self) {
        let mut p = self.inner.lock().expect("progress mutex poisoned");
        p.completed_symbols += 1;
    }

    /// Take a consistent snapshot of the counters.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let p = self.inner.lock().expect("progress mutex poisoned");
        let resolved = p.completed_chunks + p.failed_chunks;
        ProgressSnapshot {
            completed_symbols: p.completed_symbols,
            total_symbols: p.total_symbols,
            completed_chunks: p.completed_chunks,
            failed_chunks: p.failed_chunks,
            total_chunks: p.total_chunks,
            symbol_progress_pct: pct(p.completed_symbols, p.total_symbols),
            chunk_progress_pct: pct(resolved, p.total_chunks),
            current_symbol: p.current_symbol.clone(),
            current_chunk: p.current_chunk,
            elapsed_ms: u64::try_from(p.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}
