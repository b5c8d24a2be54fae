//! Incremental-diff logic: decide what actually needs fetching.
//!
//! Compares locally-held coverage against the requested range and remote
//! availability, producing the minimal set of date ranges to (re)download.
//! Conflict resolution between overlapping local and remote data is exposed
//! as a library function; the detection path never merges anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use backfill_core::{
    BackfillError, ConflictResolution, DataSource, IncrementalUpdateInfo, LocalStore, TimeSeries,
    merge_with_resolution,
};

/// Detects missing date ranges per symbol.
pub struct IncrementalUpdateDetector {
    source: Arc<dyn DataSource>,
    store: Arc<dyn LocalStore>,
    resolution: ConflictResolution,
}

impl IncrementalUpdateDetector {
    /// Create a detector over a data source and a local store.
    #[must_use]
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn LocalStore>,
        resolution: ConflictResolution,
    ) -> Self {
        Self {
            source,
            store,
            resolution,
        }
    }

    /// Compute the per-symbol update verdicts for `[start, end]`.
    ///
    /// Decision table:
    /// - no local data: the full range needs downloading;
    /// - local data present but remote unavailable: nothing to do;
    /// - otherwise: a leading gap before the local series and a trailing gap
    ///   after it (bounded by the latest remote date) are the only ranges
    ///   fetched.
    ///
    /// # Errors
    /// Returns an error on store or source transport failure.
    pub async fn detect(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, IncrementalUpdateInfo>, BackfillError> {
        if start > end {
            return Err(BackfillError::config(format!(
                "detection range is inverted: {start} > {end}"
            )));
        }
        let mut out = BTreeMap::new();
        for symbol in symbols {
            let info = self.detect_one(symbol, start, end).await?;
            debug!(symbol = %symbol, needs_update = info.needs_update, ranges = info.update_ranges.len(), "incremental verdict");
            out.insert(symbol.clone(), info);
        }
        Ok(out)
    }

    async fn detect_one(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<IncrementalUpdateInfo, BackfillError> {
        let Some(local) = self.store.coverage(symbol).await? else {
            return Ok(IncrementalUpdateInfo {
                needs_update: true,
                update_ranges: vec![(start, end)],
                last_update: None,
                local_checksum: None,
                conflict_resolution: self.resolution,
            });
        };

        let Some(remote_latest) = self.source.latest_available(symbol).await? else {
            // Local data exists and the remote cannot say; nothing to fetch.
            return Ok(IncrementalUpdateInfo::up_to_date(
                local.last_update,
                Some(local.checksum),
                self.resolution,
            ));
        };

        let mut ranges = Vec::new();
        if start < local.first_date {
            if let Some(gap_end) = local.first_date.pred_opt() {
                ranges.push((start, gap_end));
            }
        }
        if local.last_date < remote_latest && local.last_date < end {
            if let Some(gap_start) = local.last_date.succ_opt() {
                let gap_end = remote_latest.min(end);
                if gap_start <= gap_end {
                    ranges.push((gap_start, gap_end));
                }
            }
        }

        Ok(IncrementalUpdateInfo {
            needs_update: !ranges.is_empty(),
            update_ranges: ranges,
            last_update: local.last_update,
            local_checksum: Some(local.checksum),
            conflict_resolution: self.resolution,
        })
    }

    /// Merge an overlapping local and remote series under this detector's
    /// conflict-resolution policy. Library function for future use by
    /// callers that re-download overlapping ranges; not part of the per-run
    /// pipeline.
    #[must_use]
    pub fn resolve_conflicts(&self, local: TimeSeries, remote: TimeSeries) -> TimeSeries {
        let symbol = remote.symbol.clone();
        let merged = merge_with_resolution(local.candles, remote.candles, self.resolution);
        TimeSeries::new(symbol, merged)
    }
}
