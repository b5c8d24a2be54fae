//! Adaptive date-range segmentation for chunked downloads.

use chrono::{Days, NaiveDate};

use crate::BackfillError;

/// Ranges spanning at most this many days are downloaded as a single chunk.
const SHORT_RANGE_DAYS: i64 = 30;
/// Ranges up to a year use 30-day chunks.
const MEDIUM_RANGE_DAYS: i64 = 365;
/// Anything longer uses 90-day chunks.
const LONG_CHUNK_DAYS: i64 = 90;

/// Split `[start, end]` (inclusive) into contiguous, non-overlapping,
/// ordered chunks that cover exactly the input range.
///
/// Chunk sizing adapts to the span, measured as `end - start` in days:
/// spans up to 30 days stay whole, spans up to 365 days use 30-day chunks,
/// longer spans use 90-day chunks. The effective size is then clamped to
/// `chunk_size_hint`. The final chunk is clipped to `end`.
///
/// Pure function; no side effects.
///
/// # Errors
/// Returns `BackfillError::Config` if `start > end` or the hint is not
/// positive.
pub fn segment(
    start: NaiveDate,
    end: NaiveDate,
    chunk_size_hint: i64,
) -> Result<Vec<(NaiveDate, NaiveDate)>, BackfillError> {
    if start > end {
        return Err(BackfillError::config(format!(
            "segment range is inverted: {start} > {end}"
        )));
    }
    if chunk_size_hint <= 0 {
        return Err(BackfillError::config("chunk_size_hint must be > 0"));
    }

    // Classification uses the exclusive span; the stepping math below works
    // in inclusive days per chunk.
    let span_days = (end - start).num_days();
    let effective = if span_days <= SHORT_RANGE_DAYS {
        span_days + 1
    } else if span_days <= MEDIUM_RANGE_DAYS {
        SHORT_RANGE_DAYS
    } else {
        LONG_CHUNK_DAYS
    };
    let step = effective.min(chunk_size_hint).max(1);
    // Validated positive above, so the cast cannot wrap.
    #[allow(clippy::cast_sign_loss)]
    let step_days = Days::new(step as u64 - 1);

    let mut chunks = Vec::new();
    let mut cur = start;
    while cur <= end {
        let chunk_end = cur
            .checked_add_days(step_days)
            .map_or(end, |d| d.min(end));
        chunks.push((cur, chunk_end));
        match chunk_end.checked_add_days(Days::new(1)) {
            Some(next) => cur = next,
            None => break,
        }
    }
    Ok(chunks)
}
