//! Tag Index Builder
//!
//! Offline rebuild of the tagged table from the path index, one date bucket
//! at a time. Every leaf path yields one `(Date, Tag1, Path, Tags, Version)`
//! row per tag pair, including the implicit `name` pair. Buckets are
//! committed in date order; a failure reports the last committed bucket so
//! a retry can resume after it.
//!
//! Output rows depend only on the source paths, the bucket and the rules,
//! so re-running a bucket rewrites identical rows. In `append` mode the
//! table's natural key `(Tag1, Path, Date)` absorbs the repeats; `replace`
//! mode deletes the bucket first.

pub mod error;
pub mod rules;

pub use error::{BuildError, BuildResult};
pub use rules::{RuleSet, TagRule};

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterExecutor, ExecResult, MergeMode, QueryContext};
use crate::config::{TaggerConfig, TaggerMode};
use crate::index::predicate::{date_filter, DateRange};
use crate::index::sql::{CmpOp, Expr, Projection, Select, Statement, Value};
use crate::pattern::SEPARATOR;

pub const TAGGED_COLUMNS: [&str; 5] = ["Date", "Tag1", "Path", "Tags", "Version"];

/// Outcome of a rebuild
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    pub buckets: usize,
    /// Buckets at or before the resume point
    pub skipped: usize,
    pub paths: usize,
    pub rows: usize,
    pub last_completed: Option<NaiveDate>,
    pub elapsed: Duration,
}

pub struct TagIndexBuilder {
    executor: Arc<ClusterExecutor>,
    rules: RuleSet,
    mode: TaggerMode,
    batch_rows: usize,
}

impl TagIndexBuilder {
    pub fn new(executor: Arc<ClusterExecutor>, config: &TaggerConfig) -> BuildResult<Self> {
        Ok(Self {
            executor,
            rules: RuleSet::from_config(&config.rules)?,
            mode: config.mode,
            batch_rows: config.batch_rows.max(1),
        })
    }

    pub fn mode(&self) -> TaggerMode {
        self.mode
    }

    /// Tagged rows of one leaf path in bucket `day`
    pub fn rows_for(&self, day: NaiveDate, path: &str) -> Vec<Vec<Value>> {
        let tags = self.rules.tags_for(path);
        let pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let version = day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        pairs
            .iter()
            .map(|pair| {
                vec![
                    Value::Date(day),
                    Value::str(pair.as_str()),
                    Value::str(path),
                    Value::StrArray(pairs.clone()),
                    Value::Int(version),
                ]
            })
            .collect()
    }

    /// Distinct leaf paths of the index for bucket `day`
    fn source_select(&self, day: NaiveDate) -> Select {
        let cluster = self.executor.cluster();
        let date = date_filter(&DateRange::new(day, day), cluster.index_daily);
        let leaves = Expr::not(Expr::like("Path", format!("%{}", SEPARATOR)));
        Select::new(&cluster.index_table, vec![Projection::column("Path")])
            .filter(Expr::and(vec![date, leaves]))
            .distinct()
            .ordered()
    }

    async fn rebuild_bucket(&self, day: NaiveDate, ctx: &QueryContext) -> ExecResult<(usize, usize)> {
        let cluster = self.executor.cluster();
        let source = self
            .executor
            .query(&self.source_select(day), MergeMode::Union, ctx)
            .await?;
        let paths: Vec<&str> = source.first_column().filter(|p| !p.is_empty()).collect();

        if self.mode == TaggerMode::Replace {
            let delete = Statement::Delete {
                table: cluster.tagged_table.clone(),
                filter: Expr::cmp("Date", CmpOp::Eq, Value::Date(day)),
            };
            self.executor.write(delete, ctx).await?;
        }

        let mut written = 0;
        let mut batch: Vec<Vec<Value>> = Vec::with_capacity(self.batch_rows.min(4096));
        for path in &paths {
            batch.extend(self.rows_for(day, path));
            if batch.len() >= self.batch_rows {
                written += batch.len();
                self.insert(std::mem::take(&mut batch), ctx).await?;
            }
        }
        if !batch.is_empty() {
            written += batch.len();
            self.insert(batch, ctx).await?;
        }
        Ok((paths.len(), written))
    }

    async fn insert(&self, rows: Vec<Vec<Value>>, ctx: &QueryContext) -> ExecResult<()> {
        let statement = Statement::Insert {
            table: self.executor.cluster().tagged_table.clone(),
            columns: TAGGED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        self.executor.write(statement, ctx).await
    }

    /// Rebuild every bucket of `range` after `resume_after`, oldest first
    pub async fn rebuild(
        &self,
        range: DateRange,
        resume_after: Option<NaiveDate>,
        ctx: &QueryContext,
    ) -> BuildResult<BuildStats> {
        let started = Instant::now();
        let mut stats = BuildStats {
            last_completed: resume_after,
            ..Default::default()
        };

        info!(
            request_id = %ctx.request_id,
            from = %range.from,
            until = %range.until,
            resume_after = ?resume_after,
            mode = ?self.mode,
            rules = self.rules.len(),
            "Tag index rebuild starting"
        );

        for day in range.from.iter_days().take_while(|d| *d <= range.until) {
            if resume_after.map_or(false, |r| day <= r) {
                stats.skipped += 1;
                continue;
            }

            let bucket_started = Instant::now();
            match self.rebuild_bucket(day, ctx).await {
                Ok((paths, rows)) => {
                    stats.buckets += 1;
                    stats.paths += paths;
                    stats.rows += rows;
                    stats.last_completed = Some(day);
                    debug!(
                        bucket = %day,
                        paths,
                        rows,
                        elapsed_ms = bucket_started.elapsed().as_millis() as u64,
                        "Tag index bucket committed"
                    );
                }
                Err(cause) => {
                    warn!(
                        bucket = %day,
                        last_completed = ?stats.last_completed,
                        error = %cause,
                        "Tag index bucket failed"
                    );
                    return Err(BuildError::Bucket {
                        bucket: day,
                        last_completed: stats.last_completed,
                        cause,
                    });
                }
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            buckets = stats.buckets,
            skipped = stats.skipped,
            paths = stats.paths,
            rows = stats.rows,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Tag index rebuild complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::transport::mem::{row, MemStore};
    use crate::cluster::{ClusterDescriptor, ExecError, Transport};
    use crate::config::TagRuleConfig;
    use crate::index::sql::tsv_cell;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn index_row(date: NaiveDate, path: &str) -> crate::index::sql::eval::Row {
        row(&[("Date", Value::Date(date)), ("Path", Value::str(path))])
    }

    fn seeded_store() -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        let mut rows = Vec::new();
        for d in [day(1), day(2)] {
            for p in ["servers.", "servers.web1.", "servers.web1.cpu", "cpu;dc=east"] {
                rows.push(index_row(d, p));
            }
        }
        rows.push(index_row(day(2), "servers.web2.cpu"));
        store.insert("graphite_index", rows);
        store
    }

    fn config(mode: TaggerMode) -> TaggerConfig {
        TaggerConfig {
            mode,
            batch_rows: 3,
            rules: vec![TagRuleConfig {
                regex: Some(r"^servers\.(?P<host>[^.]+)\.".into()),
                ..Default::default()
            }],
        }
    }

    fn builder(transport: Arc<dyn Transport>, mode: TaggerMode) -> TagIndexBuilder {
        let cluster = ClusterDescriptor::with_shards(vec![vec!["h1".to_string()]]);
        let exec = Arc::new(ClusterExecutor::new(cluster, transport));
        TagIndexBuilder::new(exec, &config(mode)).unwrap()
    }

    fn ctx() -> QueryContext {
        QueryContext::new("rebuild", Duration::from_secs(5))
    }

    fn snapshot(store: &MemStore) -> Vec<String> {
        let mut out: Vec<String> = store
            .table("graphite_tagged")
            .iter()
            .map(|r| {
                TAGGED_COLUMNS
                    .iter()
                    .map(|c| r.get(*c).map(tsv_cell).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_rows_for_plain_path() {
        let store = seeded_store();
        let b = builder(store, TaggerMode::Append);
        let rows = b.rows_for(day(1), "servers.web1.cpu");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Value::str("host=web1"));
        assert_eq!(rows[1][1], Value::str("name=servers.web1.cpu"));
        assert_eq!(
            rows[0][3],
            Value::StrArray(vec!["host=web1".into(), "name=servers.web1.cpu".into()])
        );
        assert_eq!(rows[0][4], Value::Int(1_709_251_200));
    }

    #[tokio::test]
    async fn test_rebuild_writes_leaf_rows() {
        let store = seeded_store();
        let b = builder(store.clone(), TaggerMode::Append);
        let stats = b
            .rebuild(DateRange::new(day(1), day(2)), None, &ctx())
            .await
            .unwrap();

        assert_eq!(stats.buckets, 2);
        assert_eq!(stats.paths, 5);
        // 2 rows per leaf in both buckets
        assert_eq!(stats.rows, 10);
        assert_eq!(stats.last_completed, Some(day(2)));

        let rows = snapshot(&store);
        assert!(rows.iter().all(|r| !r.contains("\tservers.\t")));
        assert!(rows.contains(
            &"2024-03-02\tdc=east\tcpu;dc=east\t['dc=east','name=cpu']\t1709337600".to_string()
        ));
    }

    #[tokio::test]
    async fn test_replace_rebuild_is_idempotent() {
        let store = seeded_store();
        let b = builder(store.clone(), TaggerMode::Replace);
        let range = DateRange::new(day(1), day(2));

        b.rebuild(range, None, &ctx()).await.unwrap();
        let first = snapshot(&store);
        b.rebuild(range, None, &ctx()).await.unwrap();
        assert_eq!(snapshot(&store), first);
    }

    #[tokio::test]
    async fn test_append_rebuild_repeats_identical_rows() {
        let store = seeded_store();
        let b = builder(store.clone(), TaggerMode::Append);
        let range = DateRange::new(day(1), day(2));

        b.rebuild(range, None, &ctx()).await.unwrap();
        let mut first = snapshot(&store);
        first.dedup();
        b.rebuild(range, None, &ctx()).await.unwrap();
        let mut second = snapshot(&store);
        second.dedup();
        assert_eq!(second, first);
    }

    /// Fails every insert after the first `ok` ones
    struct FailingInserts {
        inner: Arc<MemStore>,
        ok: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FailingInserts {
        async fn execute(&self, host: &str, statement: &Statement, timeout: Duration) -> ExecResult<String> {
            if matches!(statement, Statement::Insert { .. })
                && self.ok.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_err()
            {
                return Err(ExecError::Host {
                    host: host.to_string(),
                    reason: "insert rejected".to_string(),
                });
            }
            self.inner.execute(host, statement, timeout).await
        }
    }

    #[tokio::test]
    async fn test_failure_reports_resume_point() {
        let store = seeded_store();
        // bucket 1 has 4 rows = 2 batches of 3
        let flaky = Arc::new(FailingInserts {
            inner: store.clone(),
            ok: AtomicUsize::new(2),
        });
        let b = builder(flaky, TaggerMode::Append);
        let range = DateRange::new(day(1), day(2));

        let err = b.rebuild(range, None, &ctx()).await.unwrap_err();
        assert_eq!(err.last_completed(), Some(day(1)));
        assert!(matches!(err, BuildError::Bucket { bucket, .. } if bucket == day(2)));
        assert!(snapshot(&store).iter().all(|r| r.starts_with("2024-03-01")));

        let healthy = builder(store.clone(), TaggerMode::Append);
        let stats = healthy.rebuild(range, err.last_completed(), &ctx()).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.buckets, 1);
        assert_eq!(stats.last_completed, Some(day(2)));
        assert!(snapshot(&store).iter().any(|r| r.starts_with("2024-03-02")));
    }
}
