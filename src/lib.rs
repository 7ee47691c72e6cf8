//! # Carbonhouse
//!
//! Graphite `find`, `render` and tag autocomplete served out of a
//! ClickHouse-style columnar store.
//!
//! A request flows through the [`engine::Engine`]: patterns are compiled
//! ([`pattern`]), turned into index predicates ([`index`]), fanned out over
//! the store cluster ([`cluster`]), deduplicated through the single-flight
//! result cache ([`cache`]), aligned into series ([`render`]) and encoded
//! for the caller ([`encoding`]).
//!
//! ## Modules
//!
//! - [`pattern`]: Glob and `seriesByTag` compiler
//! - [`index`]: SQL AST, index predicates and the finder
//! - [`cluster`]: Store transport, pools and the sharded executor
//! - [`cache`]: Fingerprints, backends and the result cache
//! - [`render`]: Retention choice, alignment and the render pipeline
//! - [`encoding`]: JSON, pickle and protobuf wire formats
//! - [`autocomplete`]: Tag name and value completion
//! - [`tagger`]: Offline tagged index builder
//! - [`api`]: HTTP API with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use carbonhouse::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(&Config::default())?;
//!     let ctx = engine.context("example");
//!     let now = chrono::Utc::now().timestamp();
//!
//!     let matches = engine.find("servers.*.cpu", None, None, now, &ctx).await?;
//!     println!("Found {} paths", matches.len());
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod autocomplete;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod index;
pub mod pattern;
pub mod render;
pub mod tagger;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState};

pub use autocomplete::{AutocompleteResolver, CompleteMode, CompleteRequest, Completion};

pub use cache::{CacheError, CacheStats, Fingerprint, ResultCache};

pub use cluster::{ClusterDescriptor, ClusterExecutor, ExecError, QueryContext, Transport};

pub use config::{generate_default_config, Config, ConfigError};

pub use encoding::{EncodeError, Format};

pub use engine::{Engine, EngineError, EngineResult, EngineStats, RenderRequest};

pub use index::{DateRange, FindMatch, Finder};

pub use pattern::{CompileError, PatternCompiler, PatternNode, TagQuery};

pub use render::{Aggregation, RenderError, RenderedSeries, Renderer};

pub use tagger::{BuildError, BuildStats, TagIndexBuilder};
