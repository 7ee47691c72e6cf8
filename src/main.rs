//! Carbonhouse server
//!
//! Serves the Graphite HTTP API by default. `--tags` instead rebuilds the
//! tagged index for the autocomplete window and exits.
//!
//! # Configuration
//!
//! Without `--config` the config is searched in
//! `$XDG_CONFIG_HOME/carbonhouse/config.toml`, `/etc/carbonhouse/config.toml`
//! and `./config.toml`. `RUST_LOG` wins over `[logging] level`.

use anyhow::{bail, Context};
use carbonhouse::api::{serve, AppState};
use carbonhouse::config::{generate_default_config, Config, LoggingConfig};
use carbonhouse::engine::Engine;
use carbonhouse::index::DateRange;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "carbonhouse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Graphite find/render/autocomplete served from a columnar store")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the default config and exit
    #[arg(long)]
    config_print_default: bool,

    /// Load and validate the config, then exit
    #[arg(long)]
    check_config: bool,

    /// Rebuild the tagged index and exit
    #[arg(long)]
    tags: bool,

    /// With --tags, skip buckets up to and including this day (YYYY-MM-DD)
    #[arg(long, requires = "tags")]
    resume_after: Option<NaiveDate>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.config_print_default {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load_default(),
    };
    config.validate().context("validating config")?;

    if cli.check_config {
        println!("config OK");
        return Ok(());
    }

    init_tracing(&config.logging, cli.verbose);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster = %config.cluster.name,
        shards = config.cluster.shards.len(),
        "Starting carbonhouse"
    );

    let engine = Arc::new(Engine::new(&config).context("building engine")?);

    if cli.tags {
        return rebuild_tags(&engine, &config, cli.resume_after).await;
    }

    serve(AppState::new(Arc::clone(&engine)), &config.common.listen)
        .await
        .context("serving HTTP API")?;
    tracing::info!("carbonhouse stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("carbonhouse={},tower_http={}", level, level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn rebuild_tags(
    engine: &Engine,
    config: &Config,
    resume_after: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let today = chrono::Utc::now().date_naive();
    let range = DateRange::last_days(today, config.autocomplete.days);
    let ctx = engine.context(uuid::Uuid::new_v4().to_string());

    match engine.rebuild_tags(range, resume_after, &ctx).await {
        Ok(stats) => {
            tracing::info!(
                buckets = stats.buckets,
                skipped = stats.skipped,
                paths = stats.paths,
                rows = stats.rows,
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "Tagged index rebuilt"
            );
            Ok(())
        }
        Err(e) => {
            if let Some(day) = e.last_completed() {
                tracing::error!(resume_after = %day, "Rebuild failed, rerun with --resume-after");
            }
            bail!("tag index rebuild failed: {}", e)
        }
    }
}
