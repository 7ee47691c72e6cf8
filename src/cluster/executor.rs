//! Cluster Executor
//!
//! Sends one statement to every shard of a cluster through a bounded
//! fan-out, retries a failed shard once on its spare replica, and merges the
//! shard responses. A request whose shards do not all succeed fails as a
//! whole with [`ExecError::PartialClusterFailure`].
//!
//! ```text
//! query ──┬── shard 0: primary ──(fail)──> spare ──> rows
//!         ├── shard 1: primary ──> rows                      ──> merge
//!         └── shard N ...          (at most max_parallel in flight)
//! ```

use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::cluster::context::QueryContext;
use crate::cluster::descriptor::ClusterDescriptor;
use crate::cluster::error::{ExecError, ExecResult};
use crate::cluster::pool::HostPools;
use crate::cluster::result::{parse_tsv, MergeMode, ResultSet};
use crate::cluster::transport::Transport;
use crate::config::FailoverPolicy;
use crate::index::sql::{Select, Statement};

pub struct ClusterExecutor {
    cluster: Arc<ClusterDescriptor>,
    transport: Arc<dyn Transport>,
    pools: HostPools,
    rotation: AtomicUsize,
}

impl ClusterExecutor {
    pub fn new(cluster: ClusterDescriptor, transport: Arc<dyn Transport>) -> Self {
        let pools = HostPools::new(cluster.max_connections_per_host);
        Self {
            cluster: Arc::new(cluster),
            transport,
            pools,
            rotation: AtomicUsize::new(0),
        }
    }

    pub fn cluster(&self) -> &ClusterDescriptor {
        &self.cluster
    }

    /// Run a select on every shard and merge the results
    pub async fn query(
        &self,
        select: &Select,
        mode: MergeMode,
        ctx: &QueryContext,
    ) -> ExecResult<ResultSet> {
        if select.filter.is_false() {
            return Ok(ResultSet::default());
        }
        if self.cluster.shards.is_empty() {
            return Err(ExecError::NoShards(self.cluster.name.clone()));
        }

        let statement = Statement::Select(select.clone());
        let offset = self.rotation.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let outcomes = ctx
            .run(async {
                let statement = &statement;
                let calls: Vec<_> = self
                    .cluster
                    .shards
                    .iter()
                    .enumerate()
                    .map(|(shard, replicas)| async move {
                        let res = self
                            .call_shard(shard, replicas, statement, offset, ctx)
                            .await
                            .and_then(|(host, body)| parse_tsv(&host, &body));
                        (shard, res)
                    })
                    .collect();
                let outcomes = stream::iter(calls)
                    .buffer_unordered(self.cluster.max_parallel)
                    .collect::<Vec<_>>()
                    .await;
                Ok(outcomes)
            })
            .await?;

        let mut parts = Vec::with_capacity(outcomes.len());
        let mut failed_shards = Vec::new();
        let mut causes = Vec::new();
        for (shard, res) in outcomes {
            match res {
                Ok(rs) => parts.push(rs),
                Err(e) if e.is_caller_abort() => return Err(e),
                Err(e) => {
                    failed_shards.push(shard);
                    causes.push(e.to_string());
                }
            }
        }

        if !failed_shards.is_empty() {
            failed_shards.sort_unstable();
            warn!(
                request_id = %ctx.request_id,
                cluster = %self.cluster.name,
                failed_shards = ?failed_shards,
                "Cluster query failed on some shards"
            );
            return Err(ExecError::PartialClusterFailure {
                failed_shards,
                causes,
            });
        }

        let merged = ResultSet::merge(parts, mode);
        debug!(
            request_id = %ctx.request_id,
            rows = merged.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cluster query complete"
        );
        Ok(merged)
    }

    /// Run a write statement on shard 0 (with the same failover)
    pub async fn write(&self, statement: Statement, ctx: &QueryContext) -> ExecResult<()> {
        let replicas = self
            .cluster
            .shards
            .first()
            .ok_or_else(|| ExecError::NoShards(self.cluster.name.clone()))?;
        let offset = self.rotation.fetch_add(1, Ordering::Relaxed);

        ctx.run(async {
            self.call_shard(0, replicas, &statement, offset, ctx)
                .await
                .map(|_| ())
        })
        .await
        .map_err(|e| match e {
            e if e.is_caller_abort() => e,
            e => ExecError::PartialClusterFailure {
                failed_shards: vec![0],
                causes: vec![e.to_string()],
            },
        })
    }

    /// Try the shard's primary for this request, then at most one spare
    async fn call_shard(
        &self,
        shard: usize,
        replicas: &[String],
        statement: &Statement,
        offset: usize,
        ctx: &QueryContext,
    ) -> ExecResult<(String, String)> {
        if replicas.is_empty() {
            return Err(ExecError::NoShards(format!("{}#{}", self.cluster.name, shard)));
        }

        let attempts = match self.cluster.failover {
            FailoverPolicy::Spare => replicas.len().min(2),
            FailoverPolicy::None => 1,
        };

        let mut last_err = ExecError::DeadlineExceeded;
        for attempt in 0..attempts {
            let host = &replicas[(offset + attempt) % replicas.len()];
            match self.call_host(host, statement, ctx).await {
                Ok(body) => return Ok((host.clone(), body)),
                Err(e) if e.is_retryable() => {
                    warn!(
                        request_id = %ctx.request_id,
                        shard,
                        host = %host,
                        attempt,
                        error = %e,
                        "Store host failed"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn call_host(&self, host: &str, statement: &Statement, ctx: &QueryContext) -> ExecResult<String> {
        if ctx.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        if ctx.is_expired() {
            return Err(ExecError::DeadlineExceeded);
        }

        let _permit = self.pools.acquire(host, ctx.deadline()).await?;
        let timeout = self.cluster.host_timeout.min(ctx.remaining());
        let started = Instant::now();
        let res = self.transport.execute(host, statement, timeout).await;

        debug!(
            request_id = %ctx.request_id,
            host = %host,
            ok = res.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Store call"
        );
        match res {
            // the per-call timeout was cut short by the request deadline
            Err(ExecError::Timeout { .. }) if ctx.is_expired() => Err(ExecError::DeadlineExceeded),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::transport::mem::{row, MemStore};
    use crate::index::sql::{Expr, Projection, Value};
    use std::time::Duration;

    fn shards(spec: &[&[&str]]) -> Vec<Vec<String>> {
        spec.iter()
            .map(|s| s.iter().map(|h| h.to_string()).collect())
            .collect()
    }

    fn select_paths() -> Select {
        Select::new("idx", vec![Projection::column("Path")])
    }

    fn ctx() -> QueryContext {
        QueryContext::new("test", Duration::from_secs(5))
    }

    fn setup(spec: &[&[&str]]) -> (Arc<MemStore>, ClusterExecutor) {
        let store = Arc::new(MemStore::new());
        let exec = ClusterExecutor::new(
            ClusterDescriptor::with_shards(shards(spec)),
            store.clone() as Arc<dyn Transport>,
        );
        (store, exec)
    }

    #[tokio::test]
    async fn test_union_across_shards() {
        let (store, exec) = setup(&[&["a1"], &["b1"]]);
        store.insert_on("a1", "idx", vec![row(&[("Path", Value::str("x"))]), row(&[("Path", Value::str("y"))])]);
        store.insert_on("b1", "idx", vec![row(&[("Path", Value::str("y"))]), row(&[("Path", Value::str("z"))])]);

        let rs = exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        assert_eq!(rs.first_column().collect::<Vec<_>>(), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_failover_to_spare() {
        let (store, exec) = setup(&[&["a1", "a2"]]);
        store.insert("idx", vec![row(&[("Path", Value::str("x"))])]);
        store.fail_host("a1");

        let rs = exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(store.hosts_called(), vec!["a1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn test_only_one_spare() {
        let (store, exec) = setup(&[&["a1", "a2", "a3"]]);
        store.fail_host("a1");
        store.fail_host("a2");

        let err = exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExecError::PartialClusterFailure { .. }));
        assert_eq!(store.hosts_called().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_cluster_failure_names_failed_shard() {
        let (store, exec) = setup(&[&["a1", "a2"], &["b1", "b2"]]);
        store.insert("idx", vec![row(&[("Path", Value::str("x"))])]);
        store.fail_host("b1");
        store.fail_host("b2");

        let err = exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap_err();
        match err {
            ExecError::PartialClusterFailure { failed_shards, causes } => {
                assert_eq!(failed_shards, vec![1]);
                assert_eq!(causes.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_failover_policy() {
        let store = Arc::new(MemStore::new());
        let mut cluster = ClusterDescriptor::with_shards(shards(&[&["a1", "a2"]]));
        cluster.failover = FailoverPolicy::None;
        let exec = ClusterExecutor::new(cluster, store.clone() as Arc<dyn Transport>);
        store.fail_host("a1");

        assert!(exec.query(&select_paths(), MergeMode::Union, &ctx()).await.is_err());
        assert_eq!(store.hosts_called(), vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn test_replica_rotation() {
        let (store, exec) = setup(&[&["a1", "a2"]]);
        exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        assert_eq!(store.hosts_called(), vec!["a1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn test_host_timeout_then_spare() {
        let store = Arc::new(MemStore::new());
        let mut cluster = ClusterDescriptor::with_shards(shards(&[&["a1", "a2"]]));
        cluster.host_timeout = Duration::from_millis(30);
        let exec = ClusterExecutor::new(cluster, store.clone() as Arc<dyn Transport>);
        store.hang_host("a1");
        store.insert("idx", vec![row(&[("Path", Value::str("x"))])]);

        let rs = exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        assert_eq!(rs.len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_fan_out() {
        let store = Arc::new(MemStore::new());
        let mut cluster =
            ClusterDescriptor::with_shards(shards(&[&["s1"], &["s2"], &["s3"], &["s4"], &["s5"], &["s6"]]));
        cluster.max_parallel = 2;
        let exec = ClusterExecutor::new(cluster, store.clone() as Arc<dyn Transport>);
        store.set_delay(Duration::from_millis(20));

        exec.query(&select_paths(), MergeMode::Union, &ctx()).await.unwrap();
        assert_eq!(store.hosts_called().len(), 6);
        assert!(store.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_calls() {
        let (store, exec) = setup(&[&["a1"], &["b1"]]);
        store.hang_host("a1");
        store.hang_host("b1");

        let ctx = ctx();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = exec.query(&select_paths(), MergeMode::Union, &ctx).await.unwrap_err();
        assert_eq!(err, ExecError::Cancelled);
        assert_eq!(store.in_flight(), 0);
        assert_eq!(store.aborted(), 2);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let (store, exec) = setup(&[&["a1"]]);
        store.hang_host("a1");
        let ctx = QueryContext::new("t", Duration::from_millis(30));
        let err = exec.query(&select_paths(), MergeMode::Union, &ctx).await.unwrap_err();
        assert_eq!(err, ExecError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_false_filter_skips_store() {
        let (store, exec) = setup(&[&["a1"]]);
        let select = select_paths().filter(Expr::False);
        let rs = exec.query(&select, MergeMode::Union, &ctx()).await.unwrap();
        assert!(rs.is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_write_goes_to_first_shard() {
        let (store, exec) = setup(&[&["a1"], &["b1"]]);
        let stmt = Statement::Insert {
            table: "idx".to_string(),
            columns: vec!["Path".to_string()],
            rows: vec![vec![Value::str("w")]],
        };
        exec.write(stmt, &ctx()).await.unwrap();
        assert_eq!(store.hosts_called(), vec!["a1".to_string()]);
        assert_eq!(store.table("idx").len(), 1);
    }
}
