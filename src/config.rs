//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::render::Aggregation;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub pattern: PatternConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub autocomplete: AutocompleteConfig,

    #[serde(default)]
    pub tagger: TaggerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener and request-wide limits
#[derive(Debug, Clone, Deserialize)]
pub struct CommonConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// 0 = no limit
    #[serde(default)]
    pub max_metrics_in_find_answer: usize,
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_request_timeout() -> u64 {
    60_000
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            request_timeout_ms: default_request_timeout(),
            max_metrics_in_find_answer: 0,
        }
    }
}

/// What to do when a host of a shard fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverPolicy {
    /// Retry once on the next replica of the shard
    #[default]
    Spare,
    /// Fail the shard on the first error
    None,
}

/// One data table and the retention it serves
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataTableConfig {
    pub table: String,

    #[serde(default = "default_resolution")]
    pub resolution_secs: u32,

    /// Only serve ranges that start within this age
    pub max_age_secs: Option<u64>,

    /// Only serve paths matching this regex
    pub path_regex: Option<String>,

    /// Consolidation default for series served from this table
    pub aggregation: Option<Aggregation>,
}

fn default_resolution() -> u32 {
    60
}

/// Store cluster description
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// One entry per shard, each listing its replicas in preference order
    #[serde(default = "default_shards")]
    pub shards: Vec<Vec<String>>,

    #[serde(default = "default_index_table")]
    pub index_table: String,

    #[serde(default = "default_true")]
    pub index_daily: bool,

    #[serde(default = "default_tagged_table")]
    pub tagged_table: String,

    #[serde(default = "default_data_tables")]
    pub data_tables: Vec<DataTableConfig>,

    #[serde(default = "default_host_timeout")]
    pub host_timeout_ms: u64,

    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections_per_host: usize,

    #[serde(default)]
    pub failover: FailoverPolicy,

    /// Largest literal expansion sent as an `IN` list
    #[serde(default = "default_max_in_list")]
    pub max_in_list: usize,

    pub user: Option<String>,
    pub password: Option<String>,
}

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_shards() -> Vec<Vec<String>> {
    vec![vec!["127.0.0.1:8123".to_string()]]
}

fn default_index_table() -> String {
    "graphite_index".to_string()
}

fn default_tagged_table() -> String {
    "graphite_tagged".to_string()
}

fn default_data_tables() -> Vec<DataTableConfig> {
    vec![DataTableConfig {
        table: "graphite".to_string(),
        resolution_secs: default_resolution(),
        max_age_secs: None,
        path_regex: None,
        aggregation: None,
    }]
}

fn default_host_timeout() -> u64 {
    10_000
}

fn default_max_parallel() -> usize {
    8
}

fn default_max_connections() -> usize {
    32
}

fn default_max_in_list() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            shards: default_shards(),
            index_table: default_index_table(),
            index_daily: true,
            tagged_table: default_tagged_table(),
            data_tables: default_data_tables(),
            host_timeout_ms: default_host_timeout(),
            max_parallel: default_max_parallel(),
            max_connections_per_host: default_max_connections(),
            failover: FailoverPolicy::default(),
            max_in_list: default_max_in_list(),
            user: None,
            password: None,
        }
    }
}

/// Pattern compiler limits and regex allow-list
#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,

    #[serde(default = "default_compiled_cache_size")]
    pub compiled_cache_size: usize,

    #[serde(default = "default_regex_max_len")]
    pub regex_max_len: usize,

    #[serde(default)]
    pub regex_allow_unicode_classes: bool,

    #[serde(default = "default_true")]
    pub regex_allow_case_insensitive: bool,

    /// When false, glob wildcards are checked by the post-filter only
    #[serde(default = "default_true")]
    pub regex_in_store: bool,
}

fn default_max_alternatives() -> usize {
    256
}

fn default_compiled_cache_size() -> usize {
    10_000
}

fn default_regex_max_len() -> usize {
    512
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            max_alternatives: default_max_alternatives(),
            compiled_cache_size: default_compiled_cache_size(),
            regex_max_len: default_regex_max_len(),
            regex_allow_unicode_classes: false,
            regex_allow_case_insensitive: true,
            regex_in_store: true,
        }
    }
}

/// Result cache backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_find_ttl")]
    pub find_ttl_secs: u64,

    #[serde(default = "default_render_ttl")]
    pub render_ttl_secs: u64,

    #[serde(default = "default_autocomplete_ttl")]
    pub autocomplete_ttl_secs: u64,

    /// 0 = failures are not cached
    #[serde(default)]
    pub failure_ttl_secs: u64,

    /// Granularity time ranges are rounded to when fingerprinting
    #[serde(default = "default_time_bucket")]
    pub time_bucket_secs: u64,

    /// Values larger than this are LZ4-compressed in the backend
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold_bytes: usize,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_entries() -> usize {
    10_000
}

fn default_find_ttl() -> u64 {
    60
}

fn default_render_ttl() -> u64 {
    60
}

fn default_autocomplete_ttl() -> u64 {
    300
}

fn default_time_bucket() -> u64 {
    60
}

fn default_compress_threshold() -> usize {
    4096
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: default_redis_url(),
            max_entries: default_max_entries(),
            find_ttl_secs: default_find_ttl(),
            render_ttl_secs: default_render_ttl(),
            autocomplete_ttl_secs: default_autocomplete_ttl(),
            failure_ttl_secs: 0,
            time_bucket_secs: default_time_bucket(),
            compress_threshold_bytes: default_compress_threshold(),
        }
    }
}

/// Render pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub default_aggregation: Aggregation,

    /// 0 = no limit
    #[serde(default = "default_max_series")]
    pub max_series_per_query: usize,

    /// Steps per series a single render may produce; 0 = no limit
    #[serde(default = "default_max_points")]
    pub max_points_per_series: usize,
}

fn default_max_series() -> usize {
    10_000
}

fn default_max_points() -> usize {
    1_000_000
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_aggregation: Aggregation::default(),
            max_series_per_query: default_max_series(),
            max_points_per_series: default_max_points(),
        }
    }
}

/// Autocomplete configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AutocompleteConfig {
    /// Date buckets scanned back from today
    #[serde(default = "default_autocomplete_days")]
    pub days: u32,

    #[serde(default = "default_autocomplete_limit")]
    pub default_limit: usize,
}

fn default_autocomplete_days() -> u32 {
    7
}

fn default_autocomplete_limit() -> usize {
    100
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            days: default_autocomplete_days(),
            default_limit: default_autocomplete_limit(),
        }
    }
}

/// How the tag index builder writes a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaggerMode {
    /// Insert and rely on the table's natural-key de-duplication
    #[default]
    Append,
    /// Delete the bucket before inserting
    Replace,
}

/// One tagging rule; every given condition must hold
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TagRuleConfig {
    pub equal: Option<String>,
    pub has_prefix: Option<String>,
    pub has_suffix: Option<String>,
    pub contains: Option<String>,
    pub regex: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Tag index builder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TaggerConfig {
    #[serde(default)]
    pub mode: TaggerMode,

    #[serde(default = "default_tagger_batch")]
    pub batch_rows: usize,

    #[serde(default)]
    pub rules: Vec<TagRuleConfig>,
}

fn default_tagger_batch() -> usize {
    100_000
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            mode: TaggerMode::default(),
            batch_rows: default_tagger_batch(),
            rules: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("carbonhouse").join("config.toml")),
            Some(PathBuf::from("/etc/carbonhouse/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("CARBONHOUSE_LISTEN") {
            self.common.listen = listen;
        }

        // one shard per host
        if let Ok(hosts) = std::env::var("CARBONHOUSE_CLUSTER_HOSTS") {
            let shards: Vec<Vec<String>> = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(|h| vec![h.to_string()])
                .collect();
            if !shards.is_empty() {
                self.cluster.shards = shards;
            }
        }

        if let Ok(backend) = std::env::var("CARBONHOUSE_CACHE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.cache.backend = CacheBackendKind::Memory,
                "redis" => self.cache.backend = CacheBackendKind::Redis,
                other => tracing::warn!(backend = other, "Unknown cache backend override"),
            }
        }
        if let Ok(url) = std::env::var("CARBONHOUSE_REDIS_URL") {
            self.cache.redis_url = url;
        }

        if let Ok(level) = std::env::var("CARBONHOUSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CARBONHOUSE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.cluster.shards.is_empty() || self.cluster.shards.iter().any(|s| s.is_empty()) {
            return invalid("cluster.shards must list at least one host per shard".to_string());
        }
        if self.cluster.data_tables.is_empty() {
            return invalid("cluster.data_tables must not be empty".to_string());
        }
        for table in &self.cluster.data_tables {
            if table.resolution_secs == 0 {
                return invalid(format!("data table '{}' has zero resolution", table.table));
            }
            if let Some(re) = &table.path_regex {
                if let Err(e) = regex::Regex::new(re) {
                    return invalid(format!("data table '{}' path_regex: {}", table.table, e));
                }
            }
        }
        if self.cluster.max_parallel == 0 {
            return invalid("cluster.max_parallel must be positive".to_string());
        }
        if self.cache.time_bucket_secs == 0 {
            return invalid("cache.time_bucket_secs must be positive".to_string());
        }
        for rule in &self.tagger.rules {
            if let Some(re) = &rule.regex {
                if let Err(e) = regex::Regex::new(re) {
                    return invalid(format!("tagger rule regex '{}': {}", re, e));
                }
            }
            if let Some(bad) = rule.tags.iter().find(|t| !t.contains('=')) {
                return invalid(format!("tagger rule tag '{}' is not key=value", bad));
            }
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return invalid(format!("logging.format '{}' is not pretty or json", self.logging.format));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# carbonhouse configuration
#
# Environment variables override these settings:
# - CARBONHOUSE_LISTEN
# - CARBONHOUSE_CLUSTER_HOSTS (comma separated, one shard per host)
# - CARBONHOUSE_CACHE_BACKEND
# - CARBONHOUSE_REDIS_URL
# - CARBONHOUSE_LOG_LEVEL
# - CARBONHOUSE_LOG_FORMAT

[common]
listen = "0.0.0.0:9090"
# Whole-request budget (ms)
request_timeout_ms = 60000
# Truncate find answers (0 = no limit)
max_metrics_in_find_answer = 0

[cluster]
name = "default"
# One list per shard; replicas in preference order
shards = [["127.0.0.1:8123"]]
index_table = "graphite_index"
index_daily = true
tagged_table = "graphite_tagged"
host_timeout_ms = 10000
max_parallel = 8
max_connections_per_host = 32
# spare: retry once on the next replica; none: fail on first error
failover = "spare"
max_in_list = 256
# user = "default"
# password = ""

[[cluster.data_tables]]
table = "graphite"
resolution_secs = 60
# max_age_secs = 604800
# path_regex = "^servers\\."
# aggregation = "avg"

[pattern]
max_alternatives = 256
compiled_cache_size = 10000
regex_max_len = 512
regex_allow_unicode_classes = false
regex_allow_case_insensitive = true
regex_in_store = true

[cache]
# memory or redis
backend = "memory"
redis_url = "redis://127.0.0.1:6379"
max_entries = 10000
find_ttl_secs = 60
render_ttl_secs = 60
autocomplete_ttl_secs = 300
# Short-cache failures during outages (0 = never)
failure_ttl_secs = 0
time_bucket_secs = 60
compress_threshold_bytes = 4096

[render]
# avg, sum, min, max, last
default_aggregation = "avg"
max_series_per_query = 10000
max_points_per_series = 1000000

[autocomplete]
days = 7
default_limit = 100

[tagger]
# append or replace
mode = "append"
batch_rows = 100000

# [[tagger.rules]]
# has_prefix = "servers."
# regex = "^servers\\.(?P<host>[^.]+)\\."
# tags = ["role=server"]

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
