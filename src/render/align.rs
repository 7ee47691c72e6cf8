//! Point alignment and consolidation
//!
//! Raw rows arrive unordered and possibly duplicated (several replicas or
//! re-ingestion). Duplicates for one timestamp are resolved by the highest
//! version, then every point is bucketed by floor division from `start`.
//!
//! ```text
//! start=0 step=10     raw: (5,1) (7,3) (23,4)
//! buckets:            [0]={1,3}  [10]={}  [20]={4}
//! avg:                 2.0       absent   4.0
//! ```

use crate::render::types::{grid, Aggregation, RawPoint, RenderedSeries, SeriesPoint};

/// Keep one point per timestamp (highest version), sorted by timestamp
pub fn dedupe(mut raw: Vec<RawPoint>) -> Vec<RawPoint> {
    raw.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.version.cmp(&b.version))
            .then(a.value.total_cmp(&b.value))
    });

    let mut out: Vec<RawPoint> = Vec::with_capacity(raw.len());
    for point in raw {
        match out.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => out.push(point),
        }
    }
    out
}

/// Align raw points to the grid `[start, stop)` at `step`
pub fn align(
    name: &str,
    raw: Vec<RawPoint>,
    start: i64,
    stop: i64,
    step: i64,
    aggregation: Aggregation,
) -> RenderedSeries {
    let step = step.max(1);
    let timestamps: Vec<i64> = grid(start, stop, step).collect();
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); timestamps.len()];

    for point in dedupe(raw) {
        if point.timestamp < start || point.timestamp >= stop || point.value.is_nan() {
            continue;
        }
        let idx = (point.timestamp - start).div_euclid(step) as usize;
        if let Some(bucket) = buckets.get_mut(idx) {
            bucket.push(point.value);
        }
    }

    let points = timestamps
        .into_iter()
        .zip(buckets)
        .map(|(ts, values)| match aggregation.apply(&values) {
            Some(v) => SeriesPoint::present(ts, v),
            None => SeriesPoint::absent(ts),
        })
        .collect();

    RenderedSeries {
        name: name.to_string(),
        start,
        stop,
        step,
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_consolidation_and_gaps() {
        let raw = vec![RawPoint::new(7, 3.0), RawPoint::new(5, 1.0), RawPoint::new(23, 4.0)];
        let series = align("a.b", raw, 0, 30, 10, Aggregation::Avg);

        assert_eq!(series.points.len(), 3);
        assert_eq!(series.points[0], SeriesPoint::present(0, 2.0));
        assert_eq!(series.points[1], SeriesPoint::absent(10));
        assert!(!series.points[1].present);
        assert_eq!(series.points[2], SeriesPoint::present(20, 4.0));
    }

    #[test]
    fn test_aggregations() {
        let raw = || vec![RawPoint::new(5, 1.0), RawPoint::new(7, 3.0)];
        let first = |agg| align("x", raw(), 0, 10, 10, agg).points[0].value;
        assert_eq!(first(Aggregation::Sum), 4.0);
        assert_eq!(first(Aggregation::Min), 1.0);
        assert_eq!(first(Aggregation::Max), 3.0);
        assert_eq!(first(Aggregation::Last), 3.0);
    }

    #[test]
    fn test_highest_version_wins() {
        let raw = vec![
            RawPoint { timestamp: 5, value: 1.0, version: 2 },
            RawPoint { timestamp: 5, value: 9.0, version: 1 },
            RawPoint { timestamp: 5, value: 1.0, version: 2 },
        ];
        let series = align("x", raw, 0, 10, 10, Aggregation::Sum);
        assert_eq!(series.points[0], SeriesPoint::present(0, 1.0));
    }

    #[test]
    fn test_out_of_range_and_nan_points_ignored() {
        let raw = vec![
            RawPoint::new(-1, 5.0),
            RawPoint::new(10, 5.0),
            RawPoint::new(3, f64::NAN),
        ];
        let series = align("x", raw, 0, 10, 10, Aggregation::Avg);
        assert_eq!(series.present_count(), 0);
    }

    #[test]
    fn test_no_data_is_all_absent() {
        let series = align("x", Vec::new(), 60, 240, 60, Aggregation::Avg);
        assert_eq!(series, RenderedSeries::empty("x", 60, 240, 60));
    }
}
