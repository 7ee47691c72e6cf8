//! Render Pipeline
//!
//! Turns a list of series names and a time range into aligned series:
//!
//! ```text
//! names ──> plan (table per path) ──> data SELECT per table, IN-list chunks
//!       ──> cluster executor (concat) ──> group rows by path ──> align
//! ```
//!
//! The output holds exactly one series per requested name, in request
//! order, whether or not the store has data for it.

use futures_util::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::cluster::{ClusterExecutor, DataTable, MergeMode, QueryContext, ResultSet};
use crate::index::predicate::{date_filter, DateRange};
use crate::index::sql::{CmpOp, Expr, Projection, Select, Value};
use crate::render::align::align;
use crate::render::error::{RenderError, RenderResult};
use crate::render::retention::{effective_step, plan};
use crate::render::types::{Aggregation, Grid, RawPoint, RenderedSeries};

/// Latest accepted timestamp (9999-12-31T23:59:59Z); earlier than its
/// negation is rejected too. Also the largest accepted step.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// What to render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderQuery {
    pub names: Vec<String>,
    /// Inclusive range start, unix seconds
    pub from: i64,
    /// Inclusive range end, unix seconds
    pub until: i64,
    /// Requested step; 0 lets the data table decide
    pub step: i64,
    /// Overrides the table and configured consolidation (`consolidateBy`)
    pub aggregation: Option<Aggregation>,
}

impl RenderQuery {
    pub fn new(names: Vec<String>, from: i64, until: i64) -> Self {
        Self {
            names,
            from,
            until,
            step: 0,
            aggregation: None,
        }
    }

    pub fn validate(&self, max_series: usize) -> RenderResult<()> {
        let bounds = -MAX_TIMESTAMP..=MAX_TIMESTAMP;
        if self.from >= self.until || !bounds.contains(&self.from) || !bounds.contains(&self.until) {
            return Err(RenderError::InvalidRange {
                from: self.from,
                until: self.until,
            });
        }
        if !(0..=MAX_TIMESTAMP).contains(&self.step) {
            return Err(RenderError::InvalidStep(self.step));
        }
        if max_series > 0 && self.names.len() > max_series {
            return Err(RenderError::TooManySeries {
                count: self.names.len(),
                limit: max_series,
            });
        }
        Ok(())
    }

    /// Output grid for a table of `resolution`
    fn grid(&self, resolution: i64) -> RenderResult<Grid> {
        let step = effective_step(resolution, self.step);
        Grid::covering(self.from, self.until, step).ok_or(RenderError::InvalidRange {
            from: self.from,
            until: self.until,
        })
    }
}

pub struct Renderer {
    executor: Arc<ClusterExecutor>,
    default_aggregation: Aggregation,
    max_series: usize,
    max_points: u64,
}

impl Renderer {
    /// A limit of 0 disables the corresponding check
    pub fn new(
        executor: Arc<ClusterExecutor>,
        default_aggregation: Aggregation,
        max_series: usize,
        max_points: usize,
    ) -> Self {
        Self {
            executor,
            default_aggregation,
            max_series,
            max_points: max_points as u64,
        }
    }

    /// Reject grids that would allocate more than `max_points` per series
    fn check_points(&self, grid: &Grid) -> RenderResult<()> {
        let points = grid.points();
        if self.max_points > 0 && points > self.max_points {
            return Err(RenderError::TooManyPoints {
                points,
                limit: self.max_points,
            });
        }
        Ok(())
    }

    pub fn max_series(&self) -> usize {
        self.max_series
    }

    /// Render `query`; `now` bounds table age windows
    pub async fn render(
        &self,
        query: &RenderQuery,
        now: i64,
        ctx: &QueryContext,
    ) -> RenderResult<Vec<RenderedSeries>> {
        query.validate(self.max_series)?;
        let started = Instant::now();

        let mut unique: Vec<String> = query.names.clone();
        unique.sort();
        unique.dedup();

        let cluster = self.executor.cluster();
        let (groups, unserved) = plan(&cluster.data_tables, &unique, query.from, now, query.step);
        if !unserved.is_empty() {
            warn!(
                request_id = %ctx.request_id,
                count = unserved.len(),
                "No data table serves some series, rendering them empty"
            );
        }

        let finest = cluster.data_tables.iter().map(|t| t.resolution).min().unwrap_or(60);
        let fallback = query.grid(finest)?;
        if !unserved.is_empty() {
            self.check_points(&fallback)?;
        }

        let chunk_size = cluster.max_in_list.max(1);
        let mut fetches = Vec::new();
        for (table, paths) in &groups {
            let grid = query.grid(table.resolution)?;
            self.check_points(&grid)?;
            for chunk in paths.chunks(chunk_size) {
                fetches.push(self.fetch_table(table, chunk, grid, query, ctx));
            }
        }
        let rendered: Vec<RenderedSeries> = try_join_all(fetches).await?.into_iter().flatten().collect();

        let by_name: HashMap<&str, &RenderedSeries> =
            rendered.iter().map(|s| (s.name.as_str(), s)).collect();

        let out: Vec<RenderedSeries> = query
            .names
            .iter()
            .map(|name| match by_name.get(name.as_str()) {
                Some(series) => (*series).clone(),
                None => RenderedSeries::empty(name.clone(), fallback.start, fallback.stop, fallback.step),
            })
            .collect();

        debug!(
            request_id = %ctx.request_id,
            series = out.len(),
            tables = groups.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Render complete"
        );
        Ok(out)
    }

    /// Fetch and align the series of one table chunk
    async fn fetch_table(
        &self,
        table: &DataTable,
        paths: &[String],
        grid: Grid,
        query: &RenderQuery,
        ctx: &QueryContext,
    ) -> RenderResult<Vec<RenderedSeries>> {
        let Grid { start, stop, step } = grid;
        let aggregation = query
            .aggregation
            .or(table.aggregation)
            .unwrap_or(self.default_aggregation);

        let select = data_select(table, paths, start, stop);
        let rows = self.executor.query(&select, MergeMode::Concat, ctx).await?;
        let mut raw = parse_rows(&rows)?;

        Ok(paths
            .iter()
            .map(|path| {
                let points = raw.remove(path.as_str()).unwrap_or_default();
                align(path, points, start, stop, step, aggregation)
            })
            .collect())
    }
}

/// `SELECT Path, Time, Value, Timestamp` for `paths` over `[start, stop)`
pub fn data_select(table: &DataTable, paths: &[String], start: i64, stop: i64) -> Select {
    let values = paths.iter().map(|p| Value::Str(p.clone())).collect();
    let dates = DateRange::from_timestamps(start, stop - 1);

    Select::new(
        &table.table,
        vec![
            Projection::column("Path"),
            Projection::column("Time"),
            Projection::column("Value"),
            Projection::column("Timestamp"),
        ],
    )
    .filter(Expr::and(vec![
        date_filter(&dates, true),
        Expr::in_list("Path", values),
        Expr::cmp("Time", CmpOp::Ge, Value::Int(start)),
        Expr::cmp("Time", CmpOp::Lt, Value::Int(stop)),
    ]))
}

fn parse_rows(rows: &ResultSet) -> RenderResult<HashMap<String, Vec<RawPoint>>> {
    let mut out: HashMap<String, Vec<RawPoint>> = HashMap::new();
    for row in rows.rows() {
        let [path, time, value, version] = row.as_slice() else {
            return Err(RenderError::Malformed(format!("expected 4 columns, got {}", row.len())));
        };
        let bad = |what: &str, cell: &str| RenderError::Malformed(format!("{} '{}' for {}", what, cell, path));
        let point = RawPoint {
            timestamp: time.parse().map_err(|_| bad("time", time))?,
            value: parse_value(value).ok_or_else(|| bad("value", value))?,
            version: version.parse().map_err(|_| bad("version", version))?,
        };
        out.entry(path.clone()).or_default().push(point);
    }
    Ok(out)
}

fn parse_value(cell: &str) -> Option<f64> {
    match cell {
        "nan" | "NaN" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::transport::mem::{row, MemStore};
    use crate::cluster::{ClusterDescriptor, ExecError, Transport};
    use crate::render::types::SeriesPoint;
    use chrono::NaiveDate;
    use std::time::Duration;

    const T0: i64 = 1_709_596_800; // 2024-03-05 00:00:00 UTC

    fn point(path: &str, time: i64, value: f64, version: i64) -> crate::index::sql::eval::Row {
        row(&[
            ("Date", Value::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())),
            ("Path", Value::str(path)),
            ("Time", Value::Int(time)),
            ("Value", Value::Float(value)),
            ("Timestamp", Value::Int(version)),
        ])
    }

    fn setup(tables: Vec<DataTable>) -> (Arc<MemStore>, Renderer) {
        let store = Arc::new(MemStore::new());
        let mut cluster = ClusterDescriptor::with_shards(vec![vec!["a1".to_string()], vec!["b1".to_string()]]);
        cluster.data_tables = tables;
        cluster.max_in_list = 2;
        let exec = Arc::new(ClusterExecutor::new(cluster, store.clone() as Arc<dyn Transport>));
        (store, Renderer::new(exec, Aggregation::Avg, 100, 10_000))
    }

    fn ctx() -> QueryContext {
        QueryContext::new("t", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_render_merges_shards_and_keeps_request_order() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        store.insert_on("a1", "graphite", vec![point("a.b", T0 + 5, 1.0, 1), point("c.d", T0 + 60, 5.0, 1)]);
        store.insert_on("b1", "graphite", vec![point("a.b", T0 + 7, 3.0, 1)]);

        let query = RenderQuery::new(
            vec!["c.d".to_string(), "a.b".to_string(), "missing.x".to_string()],
            T0,
            T0 + 179,
        );
        let out = renderer.render(&query, T0 + 200, &ctx()).await.unwrap();

        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c.d", "a.b", "missing.x"]);

        let ab = &out[1];
        assert_eq!((ab.start, ab.stop, ab.step), (T0, T0 + 180, 60));
        assert_eq!(ab.points[0], SeriesPoint::present(T0, 2.0));
        assert_eq!(ab.points[1], SeriesPoint::absent(T0 + 60));

        assert_eq!(out[0].points[1], SeriesPoint::present(T0 + 60, 5.0));
        assert_eq!(out[2].present_count(), 0);
        assert_eq!(out[2].points.len(), 3);
    }

    #[tokio::test]
    async fn test_consolidate_by_override_and_coarser_step() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        store.insert(
            "graphite",
            vec![point("a.b", T0, 1.0, 1), point("a.b", T0 + 60, 7.0, 1), point("a.b", T0 + 120, 4.0, 1)],
        );

        let mut query = RenderQuery::new(vec!["a.b".to_string()], T0, T0 + 299);
        query.step = 180;
        query.aggregation = Some(Aggregation::Max);
        let out = renderer.render(&query, T0 + 300, &ctx()).await.unwrap();

        assert_eq!(out[0].step, 180);
        assert_eq!(out[0].points[0].value(), Some(7.0));
    }

    #[tokio::test]
    async fn test_in_list_chunks() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        let names: Vec<String> = (0..5).map(|i| format!("s.{}", i)).collect();
        store.insert("graphite", names.iter().map(|n| point(n, T0, 1.0, 1)).collect());

        let out = renderer
            .render(&RenderQuery::new(names, T0, T0 + 59), T0 + 60, &ctx())
            .await
            .unwrap();
        assert!(out.iter().all(|s| s.present_count() == 1));
        // 3 chunks of at most 2 paths, each sent to 2 shards
        assert_eq!(store.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_invalid_range_is_client_error() {
        let (_, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        let err = renderer
            .render(&RenderQuery::new(vec!["a".into()], T0, T0), T0, &ctx())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_extreme_step_is_client_error() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        let mut query = RenderQuery::new(vec!["a.b".into()], T0, T0 + 59);
        query.step = i64::MAX - 10;
        let err = renderer.render(&query, T0 + 60, &ctx()).await.unwrap_err();
        assert_eq!(err, RenderError::InvalidStep(i64::MAX - 10));
        assert!(err.is_client_error());

        let query = RenderQuery::new(vec!["a.b".into()], i64::MIN, T0);
        let err = renderer.render(&query, T0 + 60, &ctx()).await.unwrap_err();
        assert!(matches!(err, RenderError::InvalidRange { .. }));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_point_limit_rejects_before_querying() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 1)]);
        let query = RenderQuery::new(vec!["a.b".into(), "c.d".into()], 0, T0);
        let err = renderer.render(&query, T0 + 60, &ctx()).await.unwrap_err();
        assert!(matches!(err, RenderError::TooManyPoints { limit: 10_000, .. }));
        assert!(err.is_client_error());
        assert!(store.calls().is_empty());

        // a coarser step brings the same range under the limit
        let mut query = RenderQuery::new(vec!["a.b".into()], T0, T0 + 86_399);
        query.step = 60;
        let out = renderer.render(&query, T0 + 86_400, &ctx()).await.unwrap();
        assert_eq!(out[0].points.len(), 1440);
    }

    #[tokio::test]
    async fn test_shard_failure_fails_render() {
        let (store, renderer) = setup(vec![DataTable::new("graphite", 60)]);
        store.fail_host("b1");
        let err = renderer
            .render(&RenderQuery::new(vec!["a.b".into()], T0, T0 + 59), T0 + 60, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Exec(ExecError::PartialClusterFailure { .. })
        ));
    }

    #[test]
    fn test_data_select_sql() {
        let table = DataTable::new("graphite", 60);
        let select = data_select(&table, &["a.b".to_string()], T0, T0 + 60);
        assert_eq!(
            select.to_string(),
            format!(
                "SELECT Path, Time, Value, Timestamp FROM graphite WHERE (Date >= '2024-03-05') AND (Date <= '2024-03-05') AND (Path = 'a.b') AND (Time >= {}) AND (Time < {})",
                T0,
                T0 + 60
            )
        );
    }

    #[test]
    fn test_parse_rows_malformed() {
        let rs = ResultSet::new(vec![vec!["a".into(), "x".into(), "1".into(), "1".into()]]);
        assert!(matches!(parse_rows(&rs), Err(RenderError::Malformed(_))));
        let rs = ResultSet::new(vec![vec!["a".into()]]);
        assert!(parse_rows(&rs).is_err());
    }
}
