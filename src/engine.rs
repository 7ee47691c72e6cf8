//! Query engine
//!
//! Owns every piece of shared state: the compiled-pattern cache, the
//! cluster executor and the three result caches (find, render,
//! autocomplete). One engine is built at startup, shared by all requests
//! and shut down once, which fails every in-flight cache waiter.
//!
//! ```text
//! find:         compile ─> find cache ─> Finder ─> executor
//! render:       targets ─> (find cache per glob) ─> render cache ─> Renderer ─> executor
//! autocomplete: request ─> autocomplete cache ─> AutocompleteResolver ─> executor
//! ```

use chrono::NaiveDate;
use futures_util::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::autocomplete::{AutocompleteResolver, CompleteRequest};
use crate::cache::{self, CacheError, CacheStats, Fingerprint, ResultCache};
use crate::cluster::{
    ClusterDescriptor, ClusterExecutor, ExecError, HttpTransport, QueryContext, Transport,
};
use crate::config::Config;
use crate::encoding::EncodeError;
use crate::index::{DateRange, FindMatch, Finder};
use crate::pattern::{CompileError, CompileOptions, PatternCompiler, PatternNode};
use crate::render::retention::effective_step;
use crate::render::{Aggregation, Grid, RenderError, RenderQuery, RenderedSeries, Renderer};
use crate::tagger::{BuildResult, BuildStats, TagIndexBuilder};

const DAY_SECS: i64 = 86_400;

/// Errors surfaced by engine operations.
///
/// `Clone` because the result caches hand one failure to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The engine could not be assembled from its configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Caused by the request rather than the service
    pub fn is_client_error(&self) -> bool {
        match self {
            EngineError::Compile(_) | EngineError::BadRequest(_) => true,
            EngineError::Render(e) => e.is_client_error(),
            EngineError::Encode(e) => matches!(e, EncodeError::UnknownFormat(_)),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A render request as received from a client
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Glob patterns or `seriesByTag(..)` expressions
    pub targets: Vec<String>,
    pub from: i64,
    pub until: i64,
    /// 0 lets the data table decide
    pub step: i64,
    pub aggregation: Option<Aggregation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub find: CacheStats,
    pub render: CacheStats,
    pub autocomplete: CacheStats,
    pub compiled_patterns: usize,
}

pub struct Engine {
    compiler: PatternCompiler,
    executor: Arc<ClusterExecutor>,
    finder: Arc<Finder>,
    renderer: Arc<Renderer>,
    completer: Arc<AutocompleteResolver>,
    tagger: TagIndexBuilder,
    find_cache: ResultCache<Vec<FindMatch>, EngineError>,
    render_cache: ResultCache<Vec<RenderedSeries>, EngineError>,
    complete_cache: ResultCache<Vec<String>, EngineError>,
    time_bucket: i64,
    request_timeout: Duration,
}

impl Engine {
    /// Engine talking to the configured store hosts over HTTP
    pub fn new(config: &Config) -> EngineResult<Self> {
        let transport = HttpTransport::new(config.cluster.user.clone(), config.cluster.password.clone())?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        let cluster = ClusterDescriptor::from_config(&config.cluster)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let executor = Arc::new(ClusterExecutor::new(cluster, transport));

        let options = CompileOptions {
            max_alternatives: config.pattern.max_alternatives,
            regex_max_len: config.pattern.regex_max_len,
            regex_allow_unicode_classes: config.pattern.regex_allow_unicode_classes,
            regex_allow_case_insensitive: config.pattern.regex_allow_case_insensitive,
        };
        let compiler = PatternCompiler::new(options, config.pattern.compiled_cache_size);

        let finder = Finder::new(
            Arc::clone(&executor),
            config.pattern.regex_in_store,
            config.common.max_metrics_in_find_answer,
        );
        let renderer = Renderer::new(
            Arc::clone(&executor),
            config.render.default_aggregation,
            config.render.max_series_per_query,
            config.render.max_points_per_series,
        );
        let completer = AutocompleteResolver::new(
            Arc::clone(&executor),
            config.autocomplete.days,
            config.autocomplete.default_limit,
        );
        let tagger = TagIndexBuilder::new(Arc::clone(&executor), &config.tagger)
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let backend = cache::backend_from_config(&config.cache)?;
        let c = &config.cache;

        info!(
            cluster = %executor.cluster().identity(),
            backend = backend.name(),
            "Engine ready"
        );

        Ok(Self {
            compiler,
            finder: Arc::new(finder),
            renderer: Arc::new(renderer),
            completer: Arc::new(completer),
            tagger,
            find_cache: ResultCache::new("find", Arc::clone(&backend), cache::policy(c, c.find_ttl_secs)),
            render_cache: ResultCache::new("render", Arc::clone(&backend), cache::policy(c, c.render_ttl_secs)),
            complete_cache: ResultCache::new("autocomplete", backend, cache::policy(c, c.autocomplete_ttl_secs)),
            time_bucket: c.time_bucket_secs.max(1) as i64,
            request_timeout: Duration::from_millis(config.common.request_timeout_ms),
            executor,
        })
    }

    /// Context for one request under the configured timeout
    pub fn context(&self, request_id: impl Into<String>) -> QueryContext {
        QueryContext::new(request_id, self.request_timeout)
    }

    pub fn cluster(&self) -> &ClusterDescriptor {
        self.executor.cluster()
    }

    pub fn compile(&self, raw: &str) -> EngineResult<Arc<PatternNode>> {
        Ok(self.compiler.compile(raw)?)
    }

    fn find_fingerprint(&self, node: &PatternNode, range: &DateRange) -> Fingerprint {
        Fingerprint::builder("find")
            .str(&node.canonical())
            .str(&range.from.to_string())
            .str(&range.until.to_string())
            .str(&self.cluster().identity())
            .finish()
    }

    async fn find_node(
        &self,
        node: Arc<PatternNode>,
        range: DateRange,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Vec<FindMatch>>> {
        let fp = self.find_fingerprint(&node, &range);
        let finder = Arc::clone(&self.finder);
        self.find_cache
            .get_or_build(&fp, ctx, move |ctx| async move {
                Ok(finder.find(&node, &range, &ctx).await?)
            })
            .await
    }

    /// Paths matching `pattern`. Without bounds the last day is searched.
    pub async fn find(
        &self,
        pattern: &str,
        from: Option<i64>,
        until: Option<i64>,
        now: i64,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Vec<FindMatch>>> {
        let node = self.compile(pattern)?;
        let until = until.unwrap_or(now);
        let from = from.unwrap_or(until - DAY_SECS);
        self.find_node(node, DateRange::from_timestamps(from, until), ctx).await
    }

    /// Leaf names a render target stands for. Literal paths skip the index
    /// so series missing from it still render (as all-absent).
    async fn resolve_target(
        &self,
        target: &str,
        range: DateRange,
        ctx: &QueryContext,
    ) -> EngineResult<Vec<String>> {
        let node = self.compile(target)?;
        if let PatternNode::Glob(glob) = node.as_ref() {
            if glob.is_literal() {
                return Ok(vec![node.canonical()]);
            }
        }
        let matches = self.find_node(node, range, ctx).await?;
        Ok(matches
            .iter()
            .filter(|m| m.is_leaf)
            .map(|m| m.path.clone())
            .collect())
    }

    /// Keyed on the exact output grid of every data table, so two requests
    /// share an entry only when they would render the same buckets. `now`
    /// is bucketed since it only moves the table choice at age boundaries.
    fn render_fingerprint(&self, query: &RenderQuery, now: i64) -> Fingerprint {
        let mut fp = Fingerprint::builder("render").int(query.names.len() as i64);
        for name in &query.names {
            fp = fp.str(name);
        }

        let cluster = self.cluster();
        let mut steps: Vec<i64> = cluster
            .data_tables
            .iter()
            .map(|t| effective_step(t.resolution, query.step))
            .collect();
        if steps.is_empty() {
            steps.push(effective_step(60, query.step));
        }
        steps.sort_unstable();
        steps.dedup();
        for step in steps {
            if let Some(grid) = Grid::covering(query.from, query.until, step) {
                fp = fp.int(grid.start).int(grid.stop).int(grid.step);
            }
        }

        fp.time(now, self.time_bucket)
            .int(query.step)
            .str(&query.aggregation.map(|a| a.to_string()).unwrap_or_default())
            .str(&cluster.identity())
            .finish()
    }

    /// Resolve targets and render every resulting series
    pub async fn render(
        &self,
        request: &RenderRequest,
        now: i64,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Vec<RenderedSeries>>> {
        if request.targets.is_empty() {
            return Err(EngineError::BadRequest("no target given".to_string()));
        }
        let unresolved = RenderQuery {
            names: Vec::new(),
            from: request.from,
            until: request.until,
            step: request.step,
            aggregation: request.aggregation,
        };
        unresolved.validate(0)?;

        let range = DateRange::from_timestamps(request.from, request.until);
        let resolved = try_join_all(
            request
                .targets
                .iter()
                .map(|t| self.resolve_target(t, range, ctx)),
        )
        .await?;

        let mut names: Vec<String> = Vec::new();
        for name in resolved.into_iter().flatten() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let query = RenderQuery { names, ..unresolved };
        query.validate(self.renderer.max_series())?;
        if query.names.is_empty() {
            debug!(request_id = %ctx.request_id, "No series matched the targets");
            return Ok(Arc::new(Vec::new()));
        }

        let fp = self.render_fingerprint(&query, now);
        let renderer = Arc::clone(&self.renderer);
        self.render_cache
            .get_or_build(&fp, ctx, move |ctx| async move {
                Ok(renderer.render(&query, now, &ctx).await?)
            })
            .await
    }

    /// Tag name or value completions as of `today`
    pub async fn complete(
        &self,
        request: CompleteRequest,
        today: NaiveDate,
        ctx: &QueryContext,
    ) -> EngineResult<Arc<Vec<String>>> {
        let window = self.completer.window(today);
        let fp = request.fingerprint(&self.cluster().identity(), &window);
        let completer = Arc::clone(&self.completer);
        self.complete_cache
            .get_or_build(&fp, ctx, move |ctx| async move {
                Ok(completer.complete(&request, today, &ctx).await?)
            })
            .await
    }

    /// Rebuild the tagged table for `range`
    pub async fn rebuild_tags(
        &self,
        range: DateRange,
        resume_after: Option<NaiveDate>,
        ctx: &QueryContext,
    ) -> BuildResult<BuildStats> {
        self.tagger.rebuild(range, resume_after, ctx).await
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            find: self.find_cache.stats(),
            render: self.render_cache.stats(),
            autocomplete: self.complete_cache.stats(),
            compiled_patterns: self.compiler.cached(),
        }
    }

    /// Fail every in-flight cache waiter and refuse new cached work
    pub fn shutdown(&self) {
        let in_flight = self.find_cache.in_flight()
            + self.render_cache.in_flight()
            + self.complete_cache.in_flight();
        self.find_cache.shutdown();
        self.render_cache.shutdown();
        self.complete_cache.shutdown();
        info!(in_flight, "Engine shut down");
    }
}
