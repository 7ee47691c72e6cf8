//! Finder: resolve a compiled pattern to index paths
//!
//! Builds the index predicate, runs it on every shard, then applies the
//! post-filter and the answer size limit.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::cluster::{ClusterExecutor, ExecResult, MergeMode, QueryContext};
use crate::index::predicate::{build_predicate, DateRange, IndexPredicate, PredicateOptions};
use crate::index::sql::{Projection, Select};
use crate::pattern::{PatternNode, SEPARATOR};

/// One node of a find answer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FindMatch {
    /// Path without the trailing separator of branch rows
    pub path: String,
    pub is_leaf: bool,
}

impl FindMatch {
    fn from_row(path: &str) -> Self {
        match path.strip_suffix(SEPARATOR) {
            Some(branch) => Self {
                path: branch.to_string(),
                is_leaf: false,
            },
            None => Self {
                path: path.to_string(),
                is_leaf: true,
            },
        }
    }
}

pub struct Finder {
    executor: Arc<ClusterExecutor>,
    options: PredicateOptions,
    max_answer: usize,
}

impl Finder {
    pub fn new(executor: Arc<ClusterExecutor>, regex_in_store: bool, max_answer: usize) -> Self {
        let cluster = executor.cluster();
        let options = PredicateOptions {
            regex_in_store,
            index_daily: cluster.index_daily,
            max_in_list: cluster.max_in_list,
            tagged_table: cluster.tagged_table.clone(),
        };
        Self {
            executor,
            options,
            max_answer,
        }
    }

    pub fn options(&self) -> &PredicateOptions {
        &self.options
    }

    /// The select a pattern lowers to, or `None` when nothing can match
    pub fn select(&self, node: &Arc<PatternNode>, range: &DateRange) -> Option<(Select, IndexPredicate)> {
        let predicate = build_predicate(node, range, &self.options);
        if predicate.is_empty() {
            return None;
        }
        let table = match node.as_ref() {
            PatternNode::Glob(_) => &self.executor.cluster().index_table,
            PatternNode::Tagged(_) => &self.executor.cluster().tagged_table,
        };
        let select = Select::new(table, vec![Projection::column("Path")])
            .filter(predicate.expr.clone())
            .distinct()
            .ordered();
        Some((select, predicate))
    }

    /// Paths (leaves and branches) matching `node` within `range`
    pub async fn find(
        &self,
        node: &Arc<PatternNode>,
        range: &DateRange,
        ctx: &QueryContext,
    ) -> ExecResult<Vec<FindMatch>> {
        let Some((select, predicate)) = self.select(node, range) else {
            debug!(request_id = %ctx.request_id, pattern = %node, "Predicate is empty, skipping store");
            return Ok(Vec::new());
        };

        let rows = self.executor.query(&select, MergeMode::Union, ctx).await?;
        let candidates = rows.len();
        let paths: Vec<String> = rows.first_column().map(str::to_string).collect();
        let paths = predicate.filter_paths(paths);

        let mut matches: Vec<FindMatch> = paths.iter().map(|p| FindMatch::from_row(p)).collect();
        matches.sort();
        matches.dedup();
        if self.max_answer > 0 && matches.len() > self.max_answer {
            matches.truncate(self.max_answer);
        }

        debug!(
            request_id = %ctx.request_id,
            pattern = %node,
            candidates,
            matched = matches.len(),
            post_filtered = predicate.post_filter.is_some(),
            "Find complete"
        );
        Ok(matches)
    }

    /// Leaf paths only (render targets)
    pub async fn find_leaves(
        &self,
        node: &Arc<PatternNode>,
        range: &DateRange,
        ctx: &QueryContext,
    ) -> ExecResult<Vec<String>> {
        Ok(self
            .find(node, range, ctx)
            .await?
            .into_iter()
            .filter(|m| m.is_leaf)
            .map(|m| m.path)
            .collect())
    }
}
