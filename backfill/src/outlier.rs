//! Statistical outlier detection and remediation.
//!
//! Runs one or more detection methods over every numeric column, unions the
//! findings by row key, and optionally applies a treatment. A method that
//! cannot run (insufficient data, degenerate spread) reports a soft failure
//! or simply flags nothing; other methods still run. Treatment failures are
//! logged and never fail detection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use backfill_core::{
    BackfillConfig, BackfillError, NumericField, OutlierDetectionResult, OutlierMethod,
    OutlierSummary, OutlierTreatment, TimeSeries,
};

/// Scaling constant relating the MAD to the standard deviation of a normal
/// distribution.
const MAD_SCALE: f64 = 0.6745;
/// Minimum sample size for the isolation method.
const ISOLATION_MIN_POINTS: usize = 10;
/// Minimum sample size for quartile-based methods.
const IQR_MIN_POINTS: usize = 4;

/// Runs configured detection methods and treatments over series.
pub struct OutlierDetector {
    methods: Vec<OutlierMethod>,
    z_threshold: f64,
    iqr_multiplier: f64,
    treatment: OutlierTreatment,
}

impl OutlierDetector {
    /// Create a detector from a validated pipeline config.
    ///
    /// # Errors
    /// Returns `BackfillError::Config` when thresholds are invalid or no
    /// method is configured.
    pub fn new(config: &BackfillConfig) -> Result<Self, BackfillError> {
        if !(config.z_threshold > 0.0) {
            return Err(BackfillError::config("z_threshold must be > 0"));
        }
        if !(config.iqr_multiplier > 0.0) {
            return Err(BackfillError::config("iqr_multiplier must be > 0"));
        }
        if config.outlier_methods.is_empty() {
            return Err(BackfillError::config("no outlier methods configured"));
        }
        Ok(Self {
            methods: config.outlier_methods.clone(),
            z_threshold: config.z_threshold,
            iqr_multiplier: config.iqr_multiplier,
            treatment: config.treatment,
        })
    }

    /// Detect (and, per config, treat) outliers in every series of the map.
    pub fn detect(&self, series: &mut BTreeMap<String, TimeSeries>) -> BTreeMap<String, OutlierSummary> {
        series
            .iter_mut()
            .map(|(symbol, s)| (symbol.clone(), self.detect_one(s)))
            .collect()
    }

    /// Detect outliers in one series, applying the configured treatment when
    /// it is not `MarkOnly` and at least one row was flagged.
    pub fn detect_one(&self, series: &mut TimeSeries) -> OutlierSummary {
        let results: Vec<OutlierDetectionResult> = self
            .methods
            .iter()
            .map(|&m| self.run_method(m, series))
            .collect();

        let mut union: BTreeSet<DateTime<Utc>> = BTreeSet::new();
        for r in &results {
            union.extend(r.flagged.iter().copied());
        }

        let total_rows = series.len();
        #[allow(clippy::cast_precision_loss)]
        let outlier_percentage = if total_rows == 0 {
            0.0
        } else {
            union.len() as f64 / total_rows as f64 * 100.0
        };

        let mut treatment_applied = false;
        if self.treatment != OutlierTreatment::MarkOnly && !union.is_empty() {
            match apply_treatment(series, &union, self.treatment) {
                Ok(()) => treatment_applied = true,
                Err(e) => {
                    warn!(symbol = %series.symbol, error = %e, "outlier treatment failed; series left unmodified");
                }
            }
        }

        debug!(
            symbol = %series.symbol,
            flagged = union.len(),
            total = total_rows,
            treated = treatment_applied,
            "outlier detection finished"
        );

        OutlierSummary {
            symbol: series.symbol.clone(),
            total_rows,
            outlier_count: union.len(),
            outlier_percentage,
            outliers: union,
            methods: results,
            treatment: self.treatment,
            treatment_applied,
        }
    }

    fn run_method(&self, method: OutlierMethod, series: &TimeSeries) -> OutlierDetectionResult {
        let threshold = match method {
            OutlierMethod::Iqr => self.iqr_multiplier,
            _ => self.z_threshold,
        };
        let mut by_column: BTreeMap<String, BTreeSet<DateTime<Utc>>> = BTreeMap::new();
        let mut error = None;

        for field in NumericField::ALL {
            let points: Vec<(DateTime<Utc>, f64)> = series
                .candles
                .iter()
                .filter_map(|c| field.value(c).map(|v| (c.ts, v)))
                .collect();
            if points.is_empty() {
                continue;
            }

            let flagged = match method {
                OutlierMethod::ZScore => zscore_flags(&points, self.z_threshold),
                OutlierMethod::Iqr => iqr_flags(&points, self.iqr_multiplier),
                OutlierMethod::ModifiedZScore => modified_zscore_flags(&points, self.z_threshold),
                OutlierMethod::IsolationForest => {
                    if points.len() < ISOLATION_MIN_POINTS {
                        error = Some(format!(
                            "insufficient data for isolation method: {} points, need {ISOLATION_MIN_POINTS}",
                            points.len()
                        ));
                        BTreeSet::new()
                    } else {
                        isolation_flags(&points)
                    }
                }
            };
            if !flagged.is_empty() {
                by_column.insert(field.name().to_string(), flagged);
            }
        }

        let mut flagged: BTreeSet<DateTime<Utc>> = BTreeSet::new();
        for keys in by_column.values() {
            flagged.extend(keys.iter().copied());
        }

        OutlierDetectionResult {
            method,
            threshold,
            flagged,
            by_column,
            error,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn stddev(values: &[f64], mu: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    (values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n).sqrt()
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Linear-interpolation quantile over an already sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    #[allow(clippy::cast_precision_loss)]
    let pos = q * (n - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = pos - pos.floor();
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn zscore_flags(points: &[(DateTime<Utc>, f64)], threshold: f64) -> BTreeSet<DateTime<Utc>> {
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let mu = mean(&values);
    let sd = stddev(&values, mu);
    if sd == 0.0 {
        // Constant column: nothing can be an outlier.
        return BTreeSet::new();
    }
    points
        .iter()
        .filter(|(_, v)| ((v - mu) / sd).abs() > threshold)
        .map(|(ts, _)| *ts)
        .collect()
}

fn iqr_flags(points: &[(DateTime<Utc>, f64)], multiplier: f64) -> BTreeSet<DateTime<Utc>> {
    if points.len() < IQR_MIN_POINTS {
        return BTreeSet::new();
    }
    let mut sorted: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lo = q1 - multiplier * iqr;
    let hi = q3 + multiplier * iqr;
    points
        .iter()
        .filter(|(_, v)| *v < lo || *v > hi)
        .map(|(ts, _)| *ts)
        .collect()
}

fn modified_zscore_flags(
    points: &[(DateTime<Utc>, f64)],
    threshold: f64,
) -> BTreeSet<DateTime<Utc>> {
    let mut sorted: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    sorted.sort_by(f64::total_cmp);
    let med = median(&sorted);
    let mut deviations: Vec<f64> = points.iter().map(|(_, v)| (v - med).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad = median(&deviations);
    if mad == 0.0 {
        return BTreeSet::new();
    }
    points
        .iter()
        .filter(|(_, v)| (MAD_SCALE * (v - med) / mad).abs() > threshold)
        .map(|(ts, _)| *ts)
        .collect()
}

/// Lightweight stand-in for a full isolation forest: a point is "isolated"
/// when it lies outside the interquartile range and its nearest neighbor in
/// value space is further away than three times the median adjacent gap.
fn isolation_flags(points: &[(DateTime<Utc>, f64)]) -> BTreeSet<DateTime<Utc>> {
    let mut sorted: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);

    let gaps: Vec<f64> = sorted.windows(2).map(|w| w[1] - w[0]).collect();
    let mut gap_sorted = gaps.clone();
    gap_sorted.sort_by(f64::total_cmp);
    let median_gap = median(&gap_sorted);
    if median_gap == 0.0 {
        return BTreeSet::new();
    }
    let cutoff = 3.0 * median_gap;

    let nearest = |v: f64| -> f64 {
        sorted
            .iter()
            .filter(|&&s| s != v)
            .map(|s| (s - v).abs())
            .fold(f64::INFINITY, f64::min)
    };

    points
        .iter()
        .filter(|(_, v)| (*v < q1 || *v > q3) && nearest(*v) > cutoff)
        .map(|(ts, _)| *ts)
        .collect()
}

/// Apply a treatment to the flagged rows in place.
fn apply_treatment(
    series: &mut TimeSeries,
    flagged: &BTreeSet<DateTime<Utc>>,
    treatment: OutlierTreatment,
) -> Result<(), BackfillError> {
    match treatment {
        OutlierTreatment::MarkOnly => Ok(()),
        OutlierTreatment::Remove => {
            series.candles.retain(|c| !flagged.contains(&c.ts));
            Ok(())
        }
        OutlierTreatment::Clip => clip_flagged(series, flagged),
        OutlierTreatment::Interpolate => interpolate_flagged(series, flagged),
    }
}

/// Clamp flagged values into `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` per column,
/// with quartiles computed over the untouched column.
fn clip_flagged(
    series: &mut TimeSeries,
    flagged: &BTreeSet<DateTime<Utc>>,
) -> Result<(), BackfillError> {
    for field in NumericField::ALL {
        let mut sorted: Vec<f64> = series
            .candles
            .iter()
            .filter_map(|c| field.value(c))
            .collect();
        if sorted.len() < IQR_MIN_POINTS {
            continue;
        }
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
        for c in &mut series.candles {
            if !flagged.contains(&c.ts) {
                continue;
            }
            if let Some(v) = field.value(c) {
                field.set(c, v.clamp(lo, hi));
            }
        }
    }
    Ok(())
}

/// Null out flagged values per column, then linearly interpolate between the
/// nearest unflagged neighbors along the time axis. Boundary rows take the
/// nearest available value.
fn interpolate_flagged(
    series: &mut TimeSeries,
    flagged: &BTreeSet<DateTime<Utc>>,
) -> Result<(), BackfillError> {
    let n = series.len();
    let clean: Vec<usize> = (0..n)
        .filter(|&i| !flagged.contains(&series.candles[i].ts))
        .collect();
    if clean.is_empty() {
        return Err(BackfillError::data(
            "cannot interpolate: every row is flagged",
        ));
    }

    for field in NumericField::ALL {
        // Skip columns the series does not carry at all.
        if !series.candles.iter().any(|c| field.value(c).is_some()) {
            continue;
        }
        for i in 0..n {
            if !flagged.contains(&series.candles[i].ts) {
                continue;
            }
            let prev = clean.iter().rev().find(|&&j| j < i).copied();
            let next = clean.iter().find(|&&j| j > i).copied();
            let interpolated = match (prev, next) {
                (Some(p), Some(q)) => {
                    let (vp, vq) = match (
                        field.value(&series.candles[p]),
                        field.value(&series.candles[q]),
                    ) {
                        (Some(a), Some(b)) => (a, b),
                        _ => continue,
                    };
                    let tp = series.candles[p].ts.timestamp();
                    let tq = series.candles[q].ts.timestamp();
                    let ti = series.candles[i].ts.timestamp();
                    if tq == tp {
                        vp
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        let frac = (ti - tp) as f64 / (tq - tp) as f64;
                        vp + (vq - vp) * frac
                    }
                }
                (Some(p), None) => match field.value(&series.candles[p]) {
                    Some(v) => v,
                    None => continue,
                },
                (None, Some(q)) => match field.value(&series.candles[q]) {
                    Some(v) => v,
                    None => continue,
                },
                (None, None) => continue,
            };
            field.set(&mut series.candles[i], interpolated);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (DateTime::from_timestamp(i as i64 * 86_400, 0).unwrap(), *v))
            .collect()
    }

    #[test]
    fn zscore_skips_constant_columns() {
        let flags = zscore_flags(&pts(&[5.0; 20]), 3.0);
        assert!(flags.is_empty());
    }

    #[test]
    fn zscore_flags_extreme_values() {
        let mut values = vec![10.0; 30];
        values[7] = 100.0;
        let flags = zscore_flags(&pts(&values), 3.0);
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn modified_zscore_skips_zero_mad() {
        let mut values = vec![5.0; 20];
        values[3] = 500.0;
        // MAD is zero because the bulk of the column is constant.
        let flags = modified_zscore_flags(&pts(&values), 3.0);
        assert!(flags.is_empty());
    }

    #[test]
    fn iqr_flags_both_tails() {
        let mut values: Vec<f64> = (0..30).map(|i| 50.0 + f64::from(i) * 0.1).collect();
        values[0] = -100.0;
        values[29] = 500.0;
        let flags = iqr_flags(&pts(&values), 1.5);
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&sorted, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&sorted, 0.0) - 1.0).abs() < 1e-12);
        assert!((quantile(&sorted, 1.0) - 4.0).abs() < 1e-12);
    }
}
