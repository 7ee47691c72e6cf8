//! Render data types

use serde::{Deserialize, Serialize};

/// Consolidation functions applied to raw points sharing one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Average of values
    #[default]
    Avg,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Last value by timestamp
    Last,
}

impl Aggregation {
    /// Apply to the values of one bucket, in timestamp order.
    /// An empty bucket has no value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        Some(match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Last => *values.last()?,
        })
    }

    /// Parse from string (Graphite `consolidateBy` names included)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "avg" | "average" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "last" => Some(Self::Last),
            _ => None,
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "avg"),
            Self::Sum => write!(f, "sum"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Last => write!(f, "last"),
        }
    }
}

/// A raw row from a data table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub timestamp: i64,
    pub value: f64,
    /// Ingestion version; the highest wins for duplicate timestamps
    pub version: i64,
}

impl RawPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            version: 0,
        }
    }
}

/// One aligned output point. Absent points carry `value = 0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
    pub present: bool,
}

impl SeriesPoint {
    pub fn present(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            present: true,
        }
    }

    pub fn absent(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: 0.0,
            present: false,
        }
    }

    /// Value if present
    pub fn value(&self) -> Option<f64> {
        self.present.then_some(self.value)
    }
}

/// A rendered series on a fixed step grid covering `[start, stop)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedSeries {
    pub name: String,
    pub start: i64,
    pub stop: i64,
    pub step: i64,
    pub points: Vec<SeriesPoint>,
}

impl RenderedSeries {
    /// A series with every point absent
    pub fn empty(name: impl Into<String>, start: i64, stop: i64, step: i64) -> Self {
        let points = grid(start, stop, step).map(SeriesPoint::absent).collect();
        Self {
            name: name.into(),
            start,
            stop,
            step,
            points,
        }
    }

    /// Number of present points
    pub fn present_count(&self) -> usize {
        self.points.iter().filter(|p| p.present).count()
    }
}

/// Bucket timestamps of the grid `[start, stop)` at `step`
pub fn grid(start: i64, stop: i64, step: i64) -> impl Iterator<Item = i64> {
    let step = step.max(1);
    let count = i64::try_from(grid_len(start, stop, step)).unwrap_or(i64::MAX);
    (0..count).map(move |i| start + i * step)
}

/// Number of buckets in `[start, stop)` at `step`
pub fn grid_len(start: i64, stop: i64, step: i64) -> u64 {
    if stop <= start {
        return 0;
    }
    let (span, step) = (stop as i128 - start as i128, step.max(1) as i128);
    u64::try_from((span + step - 1) / step).unwrap_or(u64::MAX)
}

/// Step-aligned grid covering an inclusive `[from, until]` range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Grid {
    /// `None` when the aligned bounds do not fit an i64
    pub fn covering(from: i64, until: i64, step: i64) -> Option<Self> {
        let step = step.max(1);
        let start = from.div_euclid(step).checked_mul(step)?;
        let stop = until.div_euclid(step).checked_add(1)?.checked_mul(step)?;
        Some(Self { start, stop, step })
    }

    pub fn points(&self) -> u64 {
        grid_len(self.start, self.stop, self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_apply() {
        let values = [1.0, 3.0, 2.0];
        assert_eq!(Aggregation::Avg.apply(&values), Some(2.0));
        assert_eq!(Aggregation::Sum.apply(&values), Some(6.0));
        assert_eq!(Aggregation::Min.apply(&values), Some(1.0));
        assert_eq!(Aggregation::Max.apply(&values), Some(3.0));
        assert_eq!(Aggregation::Last.apply(&values), Some(2.0));
        assert_eq!(Aggregation::Avg.apply(&[]), None);
    }

    #[test]
    fn test_aggregation_from_str() {
        assert_eq!(Aggregation::from_str("average"), Some(Aggregation::Avg));
        assert_eq!(Aggregation::from_str("MAX"), Some(Aggregation::Max));
        assert_eq!(Aggregation::from_str("median"), None);
    }

    #[test]
    fn test_grid_covering() {
        let g = Grid::covering(65, 179, 60).unwrap();
        assert_eq!((g.start, g.stop, g.step, g.points()), (60, 180, 60, 2));
        let g = Grid::covering(-30, 0, 60).unwrap();
        assert_eq!((g.start, g.stop), (-60, 60));
        assert!(Grid::covering(0, i64::MAX, 60).is_none());
        assert!(Grid::covering(i64::MIN, 0, 7).is_none());
    }

    #[test]
    fn test_grid() {
        assert_eq!(grid(0, 30, 10).collect::<Vec<_>>(), vec![0, 10, 20]);
        assert_eq!(grid(0, 31, 10).collect::<Vec<_>>(), vec![0, 10, 20, 30]);
        assert_eq!(grid(10, 10, 10).count(), 0);
        assert_eq!(grid_len(i64::MIN, i64::MAX, 1), u64::MAX);
        assert_eq!(grid_len(-10, 10, 3), 7);
    }

    #[test]
    fn test_empty_series() {
        let s = RenderedSeries::empty("a.b", 0, 30, 10);
        assert_eq!(s.points.len(), 3);
        assert_eq!(s.present_count(), 0);
        assert!(s.points.iter().all(|p| p.value == 0.0 && !p.present));
    }
}
