//! Carbonhouse HTTP API
//!
//! Graphite-compatible HTTP surface, built with Axum. Every endpoint
//! accepts its parameters in the query string or a form-encoded body.
//!
//! # Endpoints
//!
//! ## Graphite
//! - `GET|POST /metrics/find/` - Expand a pattern into matching paths
//! - `GET|POST /render/` - Fetch aligned series for targets
//! - `GET|POST /tags/autoComplete/tags` - Complete tag names
//! - `GET|POST /tags/autoComplete/values` - Complete tag values
//!
//! ## Health
//! - `GET /alive` - Plain-text liveness
//! - `GET /health/live` - Liveness check
//! - `GET /health/ready` - Readiness with cache statistics
//!
//! Every response carries an `X-Request-Id` header: the caller's, when one
//! was sent, or a generated one.
//!
//! # Example
//!
//! ```rust,ignore
//! use carbonhouse::api::{serve, AppState};
//! use carbonhouse::{Config, Engine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default();
//!     let engine = Arc::new(Engine::new(&config)?);
//!     serve(AppState::new(engine), &config.common.listen).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod params;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, RequestId};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let graphite_routes = Router::new()
        .route("/metrics/find", get(routes::find::find).post(routes::find::find))
        .route("/metrics/find/", get(routes::find::find).post(routes::find::find))
        .route("/render", get(routes::render::render).post(routes::render::render))
        .route("/render/", get(routes::render::render).post(routes::render::render))
        .route(
            "/tags/autoComplete/tags",
            get(routes::autocomplete::tag_names).post(routes::autocomplete::tag_names),
        )
        .route(
            "/tags/autoComplete/values",
            get(routes::autocomplete::tag_values).post(routes::autocomplete::tag_values),
        );

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness));

    Router::new()
        .merge(graphite_routes)
        .route("/alive", get(routes::health::alive))
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id))
        .with_state(Arc::new(state))
}

/// Attach a request id to the request extensions and the response headers
async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Start the API server
pub async fn serve(state: AppState, listen: &str) -> Result<(), ApiError> {
    let engine = Arc::clone(&state.engine);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen, cluster = %engine.cluster().identity(), "Carbonhouse API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            engine.shutdown();
        })
        .await?;

    tracing::info!("Carbonhouse API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
