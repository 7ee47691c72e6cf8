//! Autocomplete Resolver
//!
//! Completes tag names and tag values from the tagged table over the last
//! `days` date buckets. Answers are distinct, sorted and bounded by a limit.
//! Without a prefix the resolver enumerates; it never treats a missing
//! prefix as a prefix match on the empty string.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use crate::cache::Fingerprint;
use crate::cluster::{ClusterExecutor, ExecResult, MergeMode, QueryContext};
use crate::index::predicate::{date_filter, DateRange, PredicateOptions};
use crate::index::sql::{like_escape, Expr, Projection, Select};
use crate::index::tagged::tag_query_expr;
use crate::pattern::TagQuery;

/// What is being completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    TagNames,
    TagValues { key: String },
}

/// How candidates are selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteMode {
    /// Every distinct candidate, up to the limit
    Enumerate,
    /// Candidates starting with the prefix
    Prefix(String),
}

impl CompleteMode {
    /// A missing or empty request parameter means enumeration
    pub fn from_param(prefix: Option<&str>) -> Self {
        match prefix {
            Some(p) if !p.is_empty() => CompleteMode::Prefix(p.to_string()),
            _ => CompleteMode::Enumerate,
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        match self {
            CompleteMode::Enumerate => true,
            CompleteMode::Prefix(p) => candidate.starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteRequest {
    pub target: Completion,
    pub mode: CompleteMode,
    /// 0 = the configured default
    pub limit: usize,
    /// Only complete over series matching this expression
    pub expr: Option<TagQuery>,
}

impl CompleteRequest {
    pub fn tag_names(mode: CompleteMode, limit: usize) -> Self {
        Self {
            target: Completion::TagNames,
            mode,
            limit,
            expr: None,
        }
    }

    pub fn tag_values(key: impl Into<String>, mode: CompleteMode, limit: usize) -> Self {
        Self {
            target: Completion::TagValues { key: key.into() },
            mode,
            limit,
            expr: None,
        }
    }

    pub fn with_expr(mut self, expr: TagQuery) -> Self {
        self.expr = Some(expr);
        self
    }

    /// Cache key: operation, key, mode and prefix, limit, narrowing
    /// expression, scanned window and cluster
    pub fn fingerprint(&self, cluster: &str, window: &DateRange) -> Fingerprint {
        let mut fp = Fingerprint::builder("autocomplete");
        fp = match &self.target {
            Completion::TagNames => fp.str("tags").str(""),
            Completion::TagValues { key } => fp.str("values").str(key),
        };
        fp = match &self.mode {
            CompleteMode::Enumerate => fp.str("enumerate").str(""),
            CompleteMode::Prefix(p) => fp.str("prefix").str(p),
        };
        fp.int(self.limit as i64)
            .str(&self.expr.as_ref().map(ToString::to_string).unwrap_or_default())
            .str(&window.from.to_string())
            .str(&window.until.to_string())
            .str(cluster)
            .finish()
    }
}

pub struct AutocompleteResolver {
    executor: Arc<ClusterExecutor>,
    options: PredicateOptions,
    days: u32,
    default_limit: usize,
}

impl AutocompleteResolver {
    pub fn new(executor: Arc<ClusterExecutor>, days: u32, default_limit: usize) -> Self {
        let cluster = executor.cluster();
        let options = PredicateOptions {
            regex_in_store: true,
            index_daily: true,
            max_in_list: cluster.max_in_list,
            tagged_table: cluster.tagged_table.clone(),
        };
        Self {
            executor,
            options,
            days: days.max(1),
            default_limit: default_limit.max(1),
        }
    }

    /// Date buckets scanned for a request made on `today`
    pub fn window(&self, today: NaiveDate) -> DateRange {
        DateRange::last_days(today, self.days)
    }

    pub fn limit(&self, request: &CompleteRequest) -> usize {
        if request.limit == 0 {
            self.default_limit
        } else {
            request.limit
        }
    }

    /// Tag keys the expression already constrains; tag name completion
    /// leaves them out
    fn used_keys(request: &CompleteRequest) -> Vec<&str> {
        match (&request.target, &request.expr) {
            (Completion::TagNames, Some(expr)) => {
                let mut keys: Vec<&str> = expr.filters().iter().map(|f| f.key.as_str()).collect();
                keys.dedup();
                keys
            }
            _ => Vec::new(),
        }
    }

    /// The select a request lowers to, or `None` when nothing can match
    pub fn select(&self, request: &CompleteRequest, window: &DateRange) -> Option<Select> {
        let date = date_filter(window, true);
        if date.is_false() {
            return None;
        }

        let table = &self.options.tagged_table;
        let (projection, condition) = match (&request.target, &request.mode) {
            (Completion::TagNames, CompleteMode::Enumerate) => {
                (Projection::TagKey("Tag1".into()), Expr::True)
            }
            (Completion::TagNames, CompleteMode::Prefix(p)) => (
                Projection::TagKey("Tag1".into()),
                Expr::like("Tag1", format!("{}%", like_escape(p))),
            ),
            (Completion::TagValues { key }, mode) => {
                let prefix = match mode {
                    CompleteMode::Enumerate => "",
                    CompleteMode::Prefix(p) => p.as_str(),
                };
                (
                    Projection::TagValue("Tag1".into()),
                    Expr::like(
                        "Tag1",
                        format!("{}={}%", like_escape(key), like_escape(prefix)),
                    ),
                )
            }
        };

        let mut parts = vec![date, condition];
        if let Some(expr) = &request.expr {
            let narrowing = tag_query_expr(expr, window, &self.options);
            if narrowing.is_false() {
                return None;
            }
            let series = Select::new(table, vec![Projection::column("Path")]).filter(narrowing);
            parts.push(Expr::in_subquery("Path", series, false));
        }

        let limit = self.limit(request) + Self::used_keys(request).len();
        Some(
            Select::new(table, vec![projection])
                .filter(Expr::and(parts))
                .distinct()
                .ordered()
                .limit(limit),
        )
    }

    pub async fn complete(
        &self,
        request: &CompleteRequest,
        today: NaiveDate,
        ctx: &QueryContext,
    ) -> ExecResult<Vec<String>> {
        let window = self.window(today);
        let Some(select) = self.select(request, &window) else {
            return Ok(Vec::new());
        };

        let rows = self.executor.query(&select, MergeMode::Union, ctx).await?;
        let used = Self::used_keys(request);
        let mut out: Vec<String> = rows
            .first_column()
            .filter(|c| !c.is_empty() && request.mode.accepts(c) && !used.contains(c))
            .map(str::to_string)
            .collect();
        out.sort();
        out.dedup();
        out.truncate(self.limit(request));

        debug!(
            request_id = %ctx.request_id,
            target = ?request.target,
            mode = ?request.mode,
            returned = out.len(),
            "Autocomplete complete"
        );
        Ok(out)
    }
}
