//! Aggregation engine: derive coarser series from finer points
//!
//! Pure functions over reader output; nothing here touches storage.
//!
//! Output conventions:
//! - `sum_range`: timestamp of the latest contributing point, no categories
//! - `sum_histogram`, `percentile_filter`: one point per non-empty target
//!   bucket, stamped with the bucket start, no categories
//! - `last_per`: the selected input point itself, categories included
//!
//! Measurement names absent from a point contribute nothing; they are never
//! treated as zero.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SeriesError};
use crate::model::{
    MeasurementDistance, MeasurementValue, Measurements, SeriesDefinition, TimeSeriesPoint,
};

/// Per-measurement sum over the points inside `[from, to]` (bounds optional)
///
/// Returns `None` when no point falls in range.
pub fn sum_range(
    points: &[TimeSeriesPoint],
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Option<TimeSeriesPoint> {
    let in_range: Vec<&TimeSeriesPoint> = points
        .iter()
        .filter(|p| {
            from.map_or(true, |f| p.timestamp >= f) && to.map_or(true, |t| p.timestamp <= t)
        })
        .collect();
    let latest = in_range.iter().map(|p| p.timestamp).max()?;
    Some(TimeSeriesPoint {
        timestamp: latest,
        measurements: sum_measurements(&in_range),
        categories: Default::default(),
    })
}

/// Per-measurement sums, one point per non-empty bucket of `target`
pub fn sum_histogram(
    points: &[TimeSeriesPoint],
    source: MeasurementDistance,
    target: MeasurementDistance,
) -> Result<Vec<TimeSeriesPoint>> {
    source.require_coarser(target)?;
    Ok(buckets(points, target)
        .into_iter()
        .map(|(start, members)| TimeSeriesPoint {
            timestamp: start,
            measurements: sum_measurements(&members),
            categories: Default::default(),
        })
        .collect())
}

/// The latest point of every non-empty bucket of `target`
///
/// Among points with the same timestamp the later one in input order wins.
pub fn last_per(
    points: &[TimeSeriesPoint],
    source: MeasurementDistance,
    target: MeasurementDistance,
) -> Result<Vec<TimeSeriesPoint>> {
    source.require_coarser(target)?;
    Ok(buckets(points, target)
        .into_values()
        .filter_map(|members| {
            members
                .into_iter()
                .reduce(|best, p| if p.timestamp >= best.timestamp { p } else { best })
                .cloned()
        })
        .collect())
}

/// Nearest-rank percentile per measurement name, per bucket of `target`
///
/// For `n` values sorted ascending the result is the value at rank
/// `ceil(p / 100 * n)`, clamped to `[1, n]`. Percentile 0 yields the
/// minimum and 100 the maximum.
pub fn percentile_filter(
    points: &[TimeSeriesPoint],
    percentile: f64,
    source: MeasurementDistance,
    target: MeasurementDistance,
) -> Result<Vec<TimeSeriesPoint>> {
    if !percentile.is_finite() || !(0.0..=100.0).contains(&percentile) {
        return Err(SeriesError::invalid(format!(
            "percentile must be within [0, 100], got {}",
            percentile
        )));
    }
    source.require_coarser(target)?;

    Ok(buckets(points, target)
        .into_iter()
        .map(|(start, members)| {
            let mut values: BTreeMap<&str, Vec<MeasurementValue>> = BTreeMap::new();
            for point in members {
                for (name, value) in &point.measurements {
                    values.entry(name.as_str()).or_default().push(*value);
                }
            }
            let measurements = values
                .into_iter()
                .filter_map(|(name, mut vs)| {
                    nearest_rank(&mut vs, percentile).map(|v| (name.to_string(), v))
                })
                .collect();
            TimeSeriesPoint {
                timestamp: start,
                measurements,
                categories: Default::default(),
            }
        })
        .collect())
}

/// Deduplicated definitions in (owner, name, distance) order
pub fn available_series<I>(definitions: I) -> Vec<SeriesDefinition>
where
    I: IntoIterator<Item = SeriesDefinition>,
{
    definitions
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn nearest_rank(values: &mut [MeasurementValue], percentile: f64) -> Option<MeasurementValue> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.as_f64().total_cmp(&b.as_f64()));
    let n = values.len();
    // Multiply before dividing: p * n is exact for integral p
    let rank = (percentile * n as f64 / 100.0).ceil() as usize;
    let rank = rank.clamp(1, n);
    values.get(rank - 1).copied()
}

/// Group points by target bucket start, preserving input order inside a bucket
fn buckets(
    points: &[TimeSeriesPoint],
    target: MeasurementDistance,
) -> BTreeMap<DateTime<Utc>, Vec<&TimeSeriesPoint>> {
    let mut grouped: BTreeMap<DateTime<Utc>, Vec<&TimeSeriesPoint>> = BTreeMap::new();
    for point in points {
        grouped
            .entry(target.bucket_start(point.timestamp))
            .or_default()
            .push(point);
    }
    grouped
}

fn sum_measurements(points: &[&TimeSeriesPoint]) -> Measurements {
    let mut sums = Measurements::new();
    for point in points {
        for (name, value) in &point.measurements {
            sums.entry(name.clone())
                .and_modify(|sum| *sum = sum.add(*value))
                .or_insert(*value);
        }
    }
    sums
}
