use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};

use crate::types::{Candle, ConflictResolution};

/// Merge downloaded chunks of one symbol in arrival order.
///
/// - Candles are keyed by `ts`; the first appearance wins for duplicates.
/// - Candles are returned sorted by timestamp.
///
/// Merging the same chunk twice yields the same series as merging it once.
#[must_use]
pub fn merge_chunks<I>(chunks: I) -> Vec<Candle>
where
    I: IntoIterator<Item = Vec<Candle>>,
{
    let mut map: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for chunk in chunks {
        for c in chunk {
            if let Entry::Vacant(v) = map.entry(c.ts) {
                v.insert(c);
            }
        }
    }
    map.into_values().collect()
}

/// Fold one more chunk into an accumulated series, keeping the first
/// occurrence on duplicate timestamps. Used by the downloader's per-symbol
/// merge point.
#[must_use]
pub fn merge_into(accumulated: Vec<Candle>, chunk: Vec<Candle>) -> Vec<Candle> {
    merge_chunks([accumulated, chunk])
}

/// Merge overlapping local and remote series under a conflict-resolution
/// policy. Library function for callers that resolve coverage conflicts;
/// the detection path never invokes it.
#[must_use]
pub fn merge_with_resolution(
    local: Vec<Candle>,
    remote: Vec<Candle>,
    policy: ConflictResolution,
) -> Vec<Candle> {
    match policy {
        ConflictResolution::LocalWins => merge_chunks([local, remote]),
        ConflictResolution::RemoteWins | ConflictResolution::Merge => {
            // Concatenate and keep the last (remote) occurrence per timestamp.
            let mut map: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
            for c in local.into_iter().chain(remote) {
                map.insert(c.ts, c);
            }
            map.into_values().collect()
        }
    }
}
